//! The execution context of a protocol call.
//!
//! There is no scheduler: "waiting" is expressed as a timestamp or block number stored in the
//! ledger and checked against the [`Context`] of a later call.

use alloy_primitives::Address;

/// Who is calling, and when.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Context {
    pub caller: Address,
    pub block_number: u64,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
}

impl Context {
    /// The same point in time, seen from another caller.
    #[must_use]
    pub fn with_caller(self, caller: Address) -> Self {
        Self { caller, ..self }
    }
}

/// The chain clock: current block number and timestamp.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Clock {
    block_number: u64,
    timestamp: u64,
    block_time: u64,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new(1, 1_700_000_000, 12)
    }
}

impl Clock {
    /// Create a clock at the given block and timestamp. `block_time` is the number of seconds
    /// between blocks.
    pub fn new(block_number: u64, timestamp: u64, block_time: u64) -> Self {
        Self {
            block_number,
            timestamp,
            block_time,
        }
    }

    pub fn block_number(&self) -> u64 {
        self.block_number
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn context(&self, caller: Address) -> Context {
        Context {
            caller,
            block_number: self.block_number,
            timestamp: self.timestamp,
        }
    }

    /// Move time forward by `seconds`, mining the blocks that fit in that span.
    pub fn advance_time(&mut self, seconds: u64) {
        self.timestamp += seconds;
        if self.block_time > 0 {
            self.block_number += seconds / self.block_time;
        }
    }

    /// Mine `blocks` blocks.
    pub fn advance_blocks(&mut self, blocks: u64) {
        self.block_number += blocks;
        self.timestamp += blocks * self.block_time;
    }
}
