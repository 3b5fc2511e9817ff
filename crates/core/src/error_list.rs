use crate::classification::ErrorClassification;
use crate::model::ErrorItem;

/// Stable handle to a node in an [`ErrorList`]. A handle goes stale once its
/// node is removed; the slot's generation is bumped so a reused slot never
/// answers to an old handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

#[derive(Debug, Clone)]
struct Node {
    item: ErrorItem,
    prev: Option<NodeId>,
    next: Option<NodeId>,
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    BeforeHead,
    /// Every node up to and including this one has been examined.
    After(NodeId),
    Exhausted,
}

#[derive(Debug, Clone)]
struct RetryScan {
    target: ErrorClassification,
    cursor: Cursor,
    matched: Option<NodeId>,
}

/// Ordered, doubly linked list of failed items stored in a slot arena.
#[derive(Debug, Clone, Default)]
pub struct ErrorList {
    slots: Vec<Slot>,
    free: Vec<u32>,
    head: Option<NodeId>,
    tail: Option<NodeId>,
    len: usize,
    aggregate_size: u64,
    scan: Option<RetryScan>,
}

impl ErrorList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Sum of the sizes of the items currently in the list.
    pub fn aggregate_size(&self) -> u64 {
        self.aggregate_size
    }

    pub fn front(&self) -> Option<&ErrorItem> {
        self.head.and_then(|id| self.node(id)).map(|node| &node.item)
    }

    pub fn get(&self, id: NodeId) -> Option<&ErrorItem> {
        self.node(id).map(|node| &node.item)
    }

    pub fn push_back(&mut self, item: ErrorItem) -> NodeId {
        self.aggregate_size = self
            .aggregate_size
            .saturating_add(item.item().size_or_zero());
        let node = Node {
            item,
            prev: self.tail,
            next: None,
        };

        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.node = Some(node);
                NodeId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                NodeId {
                    index,
                    generation: 0,
                }
            }
        };

        match self.tail {
            Some(tail) => {
                if let Some(tail_node) = self.node_mut(tail) {
                    tail_node.next = Some(id);
                }
            }
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.len += 1;
        id
    }

    /// Removes a node anywhere in the list, keeping an in-flight retry scan
    /// pointed at live nodes.
    pub fn remove(&mut self, id: NodeId) -> Option<ErrorItem> {
        let (prev, next) = {
            let node = self.node(id)?;
            (node.prev, node.next)
        };

        if let Some(scan) = self.scan.as_mut() {
            if scan.cursor == Cursor::After(id) {
                scan.cursor = prev.map_or(Cursor::BeforeHead, Cursor::After);
            }
            if scan.matched == Some(id) {
                scan.matched = None;
            }
        }

        match prev {
            Some(prev) => {
                if let Some(prev_node) = self.node_mut(prev) {
                    prev_node.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(next) => {
                if let Some(next_node) = self.node_mut(next) {
                    next_node.prev = prev;
                }
            }
            None => self.tail = prev,
        }

        let slot = &mut self.slots[id.index as usize];
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.len -= 1;
        self.aggregate_size = self
            .aggregate_size
            .saturating_sub(node.item.item().size_or_zero());
        Some(node.item)
    }

    /// Empties the list. Slots are kept and their generations bumped, so
    /// handles issued before the clear stay stale.
    pub fn clear(&mut self) {
        self.free.clear();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.node.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
            }
            self.free.push(u32::try_from(index).unwrap_or(u32::MAX));
        }
        self.head = None;
        self.tail = None;
        self.len = 0;
        self.aggregate_size = 0;
        self.scan = None;
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            list: self,
            next: self.head,
        }
    }

    pub fn view(&self) -> ErrorListView<'_> {
        ErrorListView { list: self }
    }

    /// Starts a retry pass targeting the classification of the current head.
    /// Returns the target, or `None` when the list is empty.
    pub fn begin_retry_pass(&mut self) -> Option<ErrorClassification> {
        let target = self.front()?.classification().clone();
        self.scan = Some(RetryScan {
            target: target.clone(),
            cursor: Cursor::BeforeHead,
            matched: None,
        });
        Some(target)
    }

    pub fn retry_target(&self) -> Option<&ErrorClassification> {
        self.scan.as_ref().map(|scan| &scan.target)
    }

    /// Advances the scan to the next node whose classification matches the
    /// pass target. Nodes already skipped are never examined again.
    pub fn has_match<F>(&mut self, same_kind: F) -> bool
    where
        F: Fn(&ErrorClassification, &ErrorClassification) -> bool,
    {
        let Some(mut scan) = self.scan.take() else {
            return false;
        };
        let found = self.advance(&mut scan, same_kind);
        self.scan = Some(scan);
        found
    }

    pub fn current_match(&self) -> Option<&ErrorItem> {
        let id = self.scan.as_ref()?.matched?;
        self.get(id)
    }

    /// Removes the matched node; the cursor moves to its former predecessor.
    pub fn take_match(&mut self) -> Option<ErrorItem> {
        let scan = self.scan.as_mut()?;
        let id = scan.matched.take()?;
        let prev = self.node(id)?.prev;
        if let Some(scan) = self.scan.as_mut() {
            scan.cursor = prev.map_or(Cursor::BeforeHead, Cursor::After);
        }
        self.remove(id)
    }

    pub fn end_retry_pass(&mut self) {
        self.scan = None;
    }

    fn advance<F>(&self, scan: &mut RetryScan, same_kind: F) -> bool
    where
        F: Fn(&ErrorClassification, &ErrorClassification) -> bool,
    {
        if scan.matched.is_some() {
            return true;
        }

        let mut candidate = match scan.cursor {
            Cursor::BeforeHead => self.head,
            Cursor::After(id) => self.node(id).and_then(|node| node.next),
            Cursor::Exhausted => return false,
        };
        while let Some(id) = candidate {
            let Some(node) = self.node(id) else {
                break;
            };
            if same_kind(&scan.target, node.item.classification()) {
                scan.matched = Some(id);
                return true;
            }
            scan.cursor = Cursor::After(id);
            candidate = node.next;
        }

        scan.cursor = Cursor::Exhausted;
        false
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }
}

pub struct Iter<'a> {
    list: &'a ErrorList,
    next: Option<NodeId>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a ErrorItem;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.list.node(self.next?)?;
        self.next = node.next;
        Some(&node.item)
    }
}

/// Read-only projection of an [`ErrorList`].
#[derive(Debug, Clone, Copy)]
pub struct ErrorListView<'a> {
    list: &'a ErrorList,
}

impl<'a> ErrorListView<'a> {
    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn aggregate_size(&self) -> u64 {
        self.list.aggregate_size()
    }

    pub fn front(&self) -> Option<&'a ErrorItem> {
        self.list.front()
    }

    pub fn iter(&self) -> Iter<'a> {
        self.list.iter()
    }

    pub fn to_vec(&self) -> Vec<ErrorItem> {
        self.iter().cloned().collect()
    }
}
