//! Arena-backed FIFO queue
//!
//! Elements live in a growable vector and link to each other by integer
//! handle. Popped slots go onto a free stack and are reused by later pushes,
//! so the backing vector never grows past the high-water mark of queued items.

/// Index of a slot in the backing vector. `0` is the null handle.
type Handle = u32;

const NIL: Handle = 0;

#[derive(Debug)]
struct Element<T> {
    prev: Handle,
    addr: Handle,
    next: Handle,
    value: Option<T>,
}

impl<T> Element<T> {
    /// The reset state every slot returns to when freed.
    const fn vacant() -> Self {
        Self {
            prev: NIL,
            addr: NIL,
            next: NIL,
            value: None,
        }
    }
}

/// FIFO queue over an arena of linked slots
///
/// Slot `0` is a permanent vacant template and is never handed out, which
/// lets handle `0` act as the "no element" sentinel for `head`, `tail`,
/// `prev` and `next`.
///
/// # Example
///
/// ```
/// use runq::arena::ArenaQueue;
///
/// let mut queue = ArenaQueue::with_capacity(4);
/// queue.push("a");
/// queue.push("b");
///
/// assert_eq!(queue.front(), Some(&"a"));
/// assert_eq!(queue.pop(), Some("a"));
/// assert_eq!(queue.len(), 1);
/// ```
#[derive(Debug)]
pub struct ArenaQueue<T> {
    head: Handle,
    tail: Handle,
    length: usize,
    /// Recycled handles, reused before the arena grows
    free: Vec<Handle>,
    elements: Vec<Element<T>>,
}

impl<T> Default for ArenaQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ArenaQueue<T> {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create an empty queue with room for `capacity` elements before growing
    pub fn with_capacity(capacity: usize) -> Self {
        let mut elements = Vec::with_capacity(capacity + 1);
        elements.push(Element::vacant());

        Self {
            head: NIL,
            tail: NIL,
            length: 0,
            free: Vec::new(),
            elements,
        }
    }

    /// Number of queued elements
    pub fn len(&self) -> usize {
        self.length
    }

    /// Check whether the queue holds no elements
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Peek at the oldest element
    pub fn front(&self) -> Option<&T> {
        self.get(self.head).and_then(|ele| ele.value.as_ref())
    }

    /// Append a value at the tail
    pub fn push(&mut self, value: T) {
        let addr = self.allocate();
        let tail = self.tail;

        let ele = &mut self.elements[addr as usize];
        ele.addr = addr;
        ele.prev = tail;
        ele.value = Some(value);
        self.length += 1;

        match self.get_mut(tail) {
            Some(prev) => prev.next = addr,
            None => self.head = addr,
        }
        self.tail = addr;
    }

    /// Remove and return the oldest element
    pub fn pop(&mut self) -> Option<T> {
        let addr = self.head;
        let ele = self.get_mut(addr)?;

        let next = ele.next;
        let value = std::mem::replace(ele, Element::vacant()).value;

        self.head = next;
        match self.get_mut(next) {
            Some(head) => head.prev = NIL,
            None => self.tail = NIL,
        }

        self.length -= 1;
        self.free.push(addr);
        value
    }

    /// Iterate from head to tail in insertion order
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            queue: self,
            cursor: self.head,
        }
    }

    /// Visit values head to tail until `f` returns `false`
    pub fn range<F>(&self, mut f: F)
    where
        F: FnMut(&T) -> bool,
    {
        for value in self.iter() {
            if !f(value) {
                break;
            }
        }
    }

    fn allocate(&mut self) -> Handle {
        if let Some(addr) = self.free.pop() {
            return addr;
        }

        let addr = self.elements.len() as Handle;
        self.elements.push(Element::vacant());
        addr
    }

    fn get(&self, addr: Handle) -> Option<&Element<T>> {
        if addr == NIL {
            return None;
        }
        self.elements.get(addr as usize)
    }

    fn get_mut(&mut self, addr: Handle) -> Option<&mut Element<T>> {
        if addr == NIL {
            return None;
        }
        self.elements.get_mut(addr as usize)
    }
}

/// Head-to-tail iterator over an [`ArenaQueue`]
pub struct Iter<'a, T> {
    queue: &'a ArenaQueue<T>,
    cursor: Handle,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        let ele = self.queue.get(self.cursor)?;
        self.cursor = ele.next;
        ele.value.as_ref()
    }
}

impl<'a, T> IntoIterator for &'a ArenaQueue<T> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
