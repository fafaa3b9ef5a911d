use std::{marker::PhantomData, ptr::NonNull};

/// Non-null pointer to `T`.
pub(crate) type Link<T> = Option<NonNull<T>>;

/// Intrusive list node. The allocator never stores nodes anywhere but inside
/// the memory it manages, so a node is always written in place by its owner
/// and only linked/unlinked by the [`List`].
#[repr(C)]
pub(crate) struct Node<T> {
    /// Pointer to the next node of the list
    pub next: Link<Self>,
    /// Pointer to the previous node of the list
    pub prev: Link<Self>,
    /// Element of the node
    pub data: T,
}

/// Doubly linked list over nodes that live somewhere else.
///
/// It is very important for us that, because we are the actual memory
/// allocator, this list can not make allocations itself. Therefor, every
/// method receives nodes that are already placed in memory and only rewires
/// their `next`/`prev` links.
pub(crate) struct List<T> {
    head: Link<Node<T>>,
    tail: Link<Node<T>>,
    len: usize,
    marker: PhantomData<T>,
}

pub(crate) struct Nodes<'a, T> {
    current: Link<Node<T>>,
    marker: PhantomData<&'a Node<T>>,
}

impl<T> Node<T> {
    pub const fn new(data: T) -> Self {
        Self { next: None, prev: None, data }
    }
}

impl<T> List<T> {
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
            marker: PhantomData,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Links `node` right before `anchor`, or at the end of the list when
    /// `anchor` is `None`.
    ///
    /// **SAFETY**: `node` must be valid and not linked in any list, `anchor`
    /// must be a member of this list.
    pub unsafe fn insert_before(&mut self, anchor: Link<Node<T>>, mut node: NonNull<Node<T>>) {
        unsafe {
            match anchor {
                Some(mut anchor) => {
                    let prev = anchor.as_ref().prev;
                    node.as_mut().prev = prev;
                    node.as_mut().next = Some(anchor);
                    anchor.as_mut().prev = Some(node);

                    match prev {
                        Some(mut prev) => prev.as_mut().next = Some(node),
                        None => self.head = Some(node),
                    }
                }
                None => {
                    node.as_mut().next = None;
                    node.as_mut().prev = self.tail;

                    match self.tail {
                        Some(mut tail) => tail.as_mut().next = Some(node),
                        None => self.head = Some(node),
                    }

                    self.tail = Some(node);
                }
            }
        }

        self.len += 1;
    }

    /// Unlinks `node` and clears its links.
    ///
    /// **SAFETY**: `node` must be a member of this list.
    pub unsafe fn remove(&mut self, mut node: NonNull<Node<T>>) {
        unsafe {
            let prev = node.as_ref().prev;
            let next = node.as_ref().next;

            match prev {
                Some(mut prev) => prev.as_mut().next = next,
                None => self.head = next,
            }

            match next {
                Some(mut next) => next.as_mut().prev = prev,
                None => self.tail = prev,
            }

            node.as_mut().prev = None;
            node.as_mut().next = None;
        }

        self.len -= 1;
    }

    /// Iterates over the node pointers from head to tail.
    pub fn nodes(&self) -> Nodes<'_, T> {
        Nodes {
            current: self.head,
            marker: PhantomData,
        }
    }
}

impl<T> Iterator for Nodes<'_, T> {
    type Item = NonNull<Node<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.current?;

        unsafe {
            self.current = node.as_ref().next;
        }

        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    fn values(list: &List<u32>) -> Vec<u32> {
        list.nodes().map(|node| unsafe { node.as_ref().data }).collect()
    }

    #[test]
    fn new_list_is_empty() {
        let list: List<u8> = List::new();

        assert_eq!(list.len(), 0);
        assert!(list.nodes().next().is_none());
    }

    #[test]
    fn insert_before_and_remove_keep_links_consistent() {
        let mut storage = [Node::new(1u32), Node::new(2), Node::new(3), Node::new(4)];
        let ptrs: Vec<NonNull<Node<u32>>> = storage.iter_mut().map(NonNull::from).collect();
        let mut list = List::new();

        unsafe {
            list.insert_before(None, ptrs[1]);
            list.insert_before(None, ptrs[3]);
            list.insert_before(Some(ptrs[1]), ptrs[0]);
            list.insert_before(Some(ptrs[3]), ptrs[2]);
        }
        assert_eq!(values(&list), [1, 2, 3, 4]);
        assert_eq!(list.len(), 4);

        unsafe {
            // Head, middle and tail removal.
            list.remove(ptrs[0]);
            list.remove(ptrs[2]);
            list.remove(ptrs[3]);
        }
        assert_eq!(values(&list), [2]);

        unsafe {
            list.remove(ptrs[1]);
        }
        assert_eq!(list.len(), 0);
        assert!(list.nodes().next().is_none());
    }
}
