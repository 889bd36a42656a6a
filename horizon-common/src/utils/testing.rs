//! Helpers shared by the workspace tests.

use std::io::{Cursor, Write as _};

use alloy_primitives::{Address, B256};
use thegraph_core::types::DeploymentId;
use tracing_subscriber::{fmt::TestWriter, EnvFilter};

/// Deployment IPFS hashes of real subgraphs, used as stable test fixtures.
const TEST_DEPLOYMENTS: [&str; 8] = [
    "QmeYTH2fK2wv96XvnCGH2eyKFE8kmRfo53zYVy5dKysZtH",
    "QmawxQJ5U1JvgosoFVDyAwutLWxrckqVmBTQxaMaKoj3Lw",
    "QmZ5EcVesbdDidvgdMtd4h5xugVkEQWBgJ84CEouZrHGEq",
    "QmU318BETTzmjUhBMDndQEaGqyP4rCSbiSZBZapaqNQQfF",
    "QmPK1s3pNYLi9ERiq3BDxKa4XosgWwFRQUydHUtz4YgpqB",
    "QmQqLJVgZLcRduoszARzRi12qGheUTWAHFf3ixMeGm2xML",
    "QmRbgjyzEgfxGbodu6itfkXCQ5KA9oGxKscrcQ9QuF88oT",
    "QmSLQfPFcz2pKRJZUH16Sk26EFpRgdxTYGnMiKvWgKRM2a",
];

/// Initialize the tests tracing subscriber. Safe to call from every test.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .compact()
        .with_writer(TestWriter::default())
        .try_init();
}

pub fn bytes_from_id<const N: usize>(id: usize) -> [u8; N] {
    let mut buf = [0u8; N];
    let mut cursor = Cursor::new(buf.as_mut());
    let _ = cursor.write(&id.to_le_bytes());
    buf
}

/// A deterministic, non-zero test address.
pub fn test_address(id: usize) -> Address {
    Address::from(bytes_from_id::<20>(id + 1))
}

/// A deterministic, non-zero test id.
pub fn test_id(id: usize) -> B256 {
    B256::from(bytes_from_id::<32>(id + 1))
}

/// A valid deployment id. Panics if `index` is out of the fixtures range.
pub fn test_deployment_id(index: usize) -> DeploymentId {
    TEST_DEPLOYMENTS[index]
        .parse()
        .expect("invalid deployment id/ipfs hash")
}
