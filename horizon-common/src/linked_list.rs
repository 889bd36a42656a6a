//! An id-keyed, singly linked list with externally owned payloads.
//!
//! The [`LinkedList`] only stores the `head`, `tail`, `nonce` and `count` of the list. The items
//! themselves, including their forward pointers, live in caller-owned storage keyed by id (see
//! [`ListStorage`] and [`ListItem`]). This split lets a single list implementation serve
//! arbitrary item schemas, e.g. thaw requests and stake claims.
//!
//! There is no backward pointer: items are only ever removed from the head.
//!
//! <div class="warning">
//! Callers must guarantee ids are unique. When appending, the caller links the previous tail's
//! forward pointer to the new id before calling [`add_tail`](LinkedList::add_tail).
//! </div>

use std::collections::HashMap;

use alloy_primitives::B256;
use serde::{Deserialize, Serialize};

/// The maximum number of items a list can hold.
pub const MAX_ITEMS: usize = 10_000;

#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum LinkedListError {
    /// The list already holds [`MAX_ITEMS`] items.
    #[error("linked list max elements exceeded")]
    MaxElementsExceeded,
    /// The zero id is reserved as the null pointer.
    #[error("linked list invalid zero id")]
    InvalidZeroId,
    /// The operation requires a non-empty list.
    #[error("linked list is empty")]
    EmptyList,
    /// More iterations were requested than items in the list.
    #[error("linked list invalid iterations: {iterations} (count: {count})")]
    InvalidIterations { iterations: usize, count: usize },
}

/// An item stored in caller-owned list storage.
pub trait ListItem {
    /// The id of the next item, or [`B256::ZERO`] for the tail.
    fn next(&self) -> B256;
    /// Link this item to the next one.
    fn set_next(&mut self, next: B256);
}

/// The caller-owned storage backing a [`LinkedList`].
pub trait ListStorage {
    /// Returns the id of the item following `id`, or [`B256::ZERO`] if there is none.
    fn next_of(&self, id: &B256) -> B256;
    /// Deletes the item with the given id.
    fn delete(&mut self, id: &B256);
}

impl<T: ListItem> ListStorage for HashMap<B256, T> {
    fn next_of(&self, id: &B256) -> B256 {
        self.get(id).map(ListItem::next).unwrap_or(B256::ZERO)
    }

    fn delete(&mut self, id: &B256) {
        self.remove(id);
    }
}

/// The outcome of visiting a list item during a [`traverse`](LinkedList::traverse).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<A> {
    /// The item was processed: remove it and continue with the next one.
    Continue(A),
    /// Stop the traversal, leaving the item in place. The accumulator is returned as is.
    Stop(A),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedList {
    pub head: B256,
    pub tail: B256,
    /// Incremented on every insertion. Used by callers to derive unique ids.
    pub nonce: u64,
    pub count: usize,
}

impl LinkedList {
    pub fn new() -> Self {
        Default::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Append `id` as the new tail.
    ///
    /// The previous tail's forward pointer must already point to `id`.
    pub fn add_tail(&mut self, id: B256) -> Result<(), LinkedListError> {
        if self.count >= MAX_ITEMS {
            return Err(LinkedListError::MaxElementsExceeded);
        }
        if id.is_zero() {
            return Err(LinkedListError::InvalidZeroId);
        }

        self.tail = id;
        self.nonce += 1;
        if self.count == 0 {
            self.head = id;
        }
        self.count += 1;
        Ok(())
    }

    /// Remove the head item, deleting it from `storage`. Returns the new head.
    pub fn remove_head<S: ListStorage>(
        &mut self,
        storage: &mut S,
    ) -> Result<B256, LinkedListError> {
        if self.count == 0 {
            return Err(LinkedListError::EmptyList);
        }

        let next = storage.next_of(&self.head);
        storage.delete(&self.head);

        self.count -= 1;
        self.head = next;
        if self.count == 0 {
            self.head = B256::ZERO;
            self.tail = B256::ZERO;
        }
        Ok(self.head)
    }

    /// Walk the list from the head, folding `visit` over the items.
    ///
    /// Each item the visitor continues on is removed from the list (and from `storage`). The walk
    /// ends when the visitor stops, the list is exhausted, or `iterations` items were removed.
    /// `iterations == 0` means the whole list.
    ///
    /// Returns the number of removed items and the final accumulator.
    pub fn traverse<S, A, E, F>(
        &mut self,
        storage: &mut S,
        mut visit: F,
        init: A,
        iterations: usize,
    ) -> Result<(usize, A), E>
    where
        S: ListStorage,
        E: From<LinkedListError>,
        F: FnMut(&mut S, B256, A) -> Result<Step<A>, E>,
    {
        if iterations > self.count {
            return Err(LinkedListError::InvalidIterations {
                iterations,
                count: self.count,
            }
            .into());
        }

        let mut remaining = if iterations == 0 {
            self.count
        } else {
            iterations
        };
        let mut acc = init;
        let mut removed = 0;
        let mut cursor = self.head;

        while !cursor.is_zero() && remaining > 0 {
            match visit(storage, cursor, acc)? {
                Step::Stop(value) => {
                    acc = value;
                    break;
                }
                Step::Continue(value) => acc = value,
            }
            cursor = self.remove_head(storage)?;
            remaining -= 1;
            removed += 1;
        }

        Ok((removed, acc))
    }

    /// Iterate over the list ids from head to tail without modifying it.
    pub fn ids<'a, S: ListStorage>(&self, storage: &'a S) -> impl Iterator<Item = B256> + 'a {
        let mut cursor = self.head;
        let mut remaining = self.count;
        std::iter::from_fn(move || {
            if cursor.is_zero() || remaining == 0 {
                return None;
            }
            let current = cursor;
            cursor = storage.next_of(&current);
            remaining -= 1;
            Some(current)
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[derive(Debug, Clone)]
    struct Item {
        value: u64,
        next: B256,
    }

    impl ListItem for Item {
        fn next(&self) -> B256 {
            self.next
        }

        fn set_next(&mut self, next: B256) {
            self.next = next;
        }
    }

    fn id(n: u8) -> B256 {
        B256::repeat_byte(n)
    }

    fn push(list: &mut LinkedList, items: &mut HashMap<B256, Item>, n: u8) {
        let new_id = id(n);
        if let Some(tail) = items.get_mut(&list.tail) {
            tail.set_next(new_id);
        }
        items.insert(
            new_id,
            Item {
                value: n as u64,
                next: B256::ZERO,
            },
        );
        list.add_tail(new_id).expect("add item");
    }

    #[test]
    fn add_items_and_traverse_from_head_to_tail() {
        //* Given
        let mut list = LinkedList::new();
        let mut items = HashMap::new();

        //* When
        for n in 1..=5 {
            push(&mut list, &mut items, n);
        }

        //* Then
        assert_eq!(list.count, 5);
        assert_eq!(list.nonce, 5);
        assert_eq!(list.head, id(1));
        assert_eq!(list.tail, id(5));

        let visited = list.ids(&items).collect::<Vec<_>>();
        assert_eq!(visited, (1..=5).map(id).collect::<Vec<_>>());
        assert_eq!(visited.last(), Some(&list.tail));
    }

    #[test]
    fn zero_id_is_rejected() {
        let mut list = LinkedList::new();
        assert_eq!(list.add_tail(B256::ZERO), Err(LinkedListError::InvalidZeroId));
        assert!(list.is_empty());
    }

    #[test]
    fn full_list_rejects_new_items() {
        //* Given
        let mut list = LinkedList {
            head: id(1),
            tail: id(2),
            nonce: MAX_ITEMS as u64,
            count: MAX_ITEMS,
        };

        //* When
        let result = list.add_tail(id(3));

        //* Then
        assert_eq!(result, Err(LinkedListError::MaxElementsExceeded));
        assert_eq!(list.tail, id(2));
        assert_eq!(list.count, MAX_ITEMS);
    }

    #[test]
    fn remove_head_until_empty_resets_pointers() {
        //* Given
        let mut list = LinkedList::new();
        let mut items = HashMap::new();
        push(&mut list, &mut items, 1);
        push(&mut list, &mut items, 2);

        //* When
        let new_head = list.remove_head(&mut items).expect("remove head");
        let empty_head = list.remove_head(&mut items).expect("remove head");

        //* Then
        assert_eq!(new_head, id(2));
        assert_eq!(empty_head, B256::ZERO);
        assert_eq!(list, LinkedList { nonce: 2, ..Default::default() });
        assert!(items.is_empty());
        assert_eq!(
            list.remove_head(&mut items),
            Err(LinkedListError::EmptyList)
        );
    }

    #[test]
    fn traverse_stops_when_the_visitor_says_so() {
        //* Given
        let mut list = LinkedList::new();
        let mut items = HashMap::new();
        for n in 1..=4 {
            push(&mut list, &mut items, n);
        }

        //* When
        // Sum items until the running total would exceed 3
        let result = list.traverse(
            &mut items,
            |items: &mut HashMap<B256, Item>, id, total: u64| {
                let value = items[&id].value;
                if total + value > 3 {
                    return Ok::<_, LinkedListError>(Step::Stop(total));
                }
                Ok(Step::Continue(total + value))
            },
            0,
            0,
        );

        //* Then
        assert_eq!(result, Ok((2, 3)));
        assert_eq!(list.count, 2);
        assert_eq!(list.head, id(3));
        assert_eq!(list.tail, id(4));
        assert!(!items.contains_key(&id(1)));
        assert!(!items.contains_key(&id(2)));
    }

    #[test]
    fn traverse_honors_iteration_limit() {
        //* Given
        let mut list = LinkedList::new();
        let mut items = HashMap::new();
        for n in 1..=3 {
            push(&mut list, &mut items, n);
        }

        //* When
        let limited = list.traverse(
            &mut items,
            |_: &mut HashMap<B256, Item>, _, count: u64| {
                Ok::<_, LinkedListError>(Step::Continue(count + 1))
            },
            0,
            2,
        );
        let too_many = list.traverse(
            &mut items,
            |_: &mut HashMap<B256, Item>, _, count: u64| {
                Ok::<_, LinkedListError>(Step::Continue(count + 1))
            },
            0,
            5,
        );

        //* Then
        assert_eq!(limited, Ok((2, 2)));
        assert_matches!(
            too_many,
            Err(LinkedListError::InvalidIterations { iterations: 5, count: 1 })
        );
    }
}
