//! Component G: the drain task.
//!
//! Finishes iterating an application's body iterator purely for side
//! effects -- used on the `HEAD` path, where headers are written but no
//! body bytes are, yet the iterator's `close` hook still has to run
//! exactly once.
//!
//! Spawned as its own future so a slow iterator cannot hold up the
//! worker that already finished writing the response; yields once per
//! item so one drain task cannot starve the reactor either.

use futures::{Async, Future, Poll};
use futures::task;

use app::BodyIter;

pub struct DrainTask {
    iter: Option<Box<BodyIter>>,
}

impl DrainTask {
    pub fn new(iter: Box<BodyIter>) -> DrainTask {
        DrainTask { iter: Some(iter) }
    }
}

impl Future for DrainTask {
    type Item = ();
    type Error = ();

    fn poll(&mut self) -> Poll<(), ()> {
        let done = {
            let iter = self.iter.as_mut().expect("DrainTask polled after completion");
            match iter.next() {
                Some(_) => false,
                None => true,
            }
        };
        if done {
            if let Some(mut iter) = self.iter.take() {
                iter.close();
            }
            return Ok(Async::Ready(()));
        }
        task::park().unpark();
        Ok(Async::NotReady)
    }
}

impl Drop for DrainTask {
    fn drop(&mut self) {
        if let Some(mut iter) = self.iter.take() {
            iter.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use app::IterBody;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct CountingIter {
        items: ::std::vec::IntoIter<Vec<u8>>,
        closes: Rc<RefCell<u32>>,
    }

    impl BodyIter for CountingIter {
        fn next(&mut self) -> Option<Vec<u8>> {
            self.items.next()
        }
        fn close(&mut self) {
            *self.closes.borrow_mut() += 1;
        }
    }

    #[test]
    fn closes_exactly_once_on_exhaustion() {
        let closes = Rc::new(RefCell::new(0));
        let iter = CountingIter { items: vec![vec![1], vec![2]].into_iter(), closes: closes.clone() };
        let mut task = DrainTask::new(Box::new(iter));
        loop {
            match task.poll() {
                Ok(Async::Ready(())) => break,
                Ok(Async::NotReady) => continue,
                Err(()) => panic!("drain task never errors"),
            }
        }
        assert_eq!(*closes.borrow(), 1);
    }

    #[test]
    fn closes_on_drop_if_abandoned() {
        let closes = Rc::new(RefCell::new(0));
        let iter = CountingIter { items: vec![vec![1]].into_iter(), closes: closes.clone() };
        {
            let mut task = DrainTask::new(Box::new(iter));
            let _ = task.poll();
        }
        assert_eq!(*closes.borrow(), 1);
    }

    #[test]
    fn iter_body_adapter_forwards_items() {
        let mut body = IterBody::new(vec![vec![9u8]].into_iter());
        assert_eq!(body.next(), Some(vec![9u8]));
        assert_eq!(body.next(), None);
    }
}
