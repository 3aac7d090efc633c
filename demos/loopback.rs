//! Two links wired back-to-back over in-memory pipes, polled from a single
//! software clock. Run with `RUST_LOG=debug` to watch the protocol traffic.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;

use log::info;
use min_link::{Channel, Link};

type Pipe = Rc<RefCell<VecDeque<u8>>>;

struct PipeEnd {
    tx: Pipe,
    rx: Pipe,
}

impl Channel for PipeEnd {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.tx.borrow_mut().extend(data.iter().copied());
        Ok(())
    }

    fn read_available(&mut self) -> Vec<u8> {
        self.rx.borrow_mut().drain(..).collect()
    }
}

fn main() {
    env_logger::init();

    let a_to_b: Pipe = Rc::new(RefCell::new(VecDeque::new()));
    let b_to_a: Pipe = Rc::new(RefCell::new(VecDeque::new()));

    let mut a = Link::new(
        String::from("a"),
        PipeEnd {
            tx: a_to_b.clone(),
            rx: b_to_a.clone(),
        },
    );
    let mut b = Link::new(String::from("b"), PipeEnd { tx: b_to_a, rx: a_to_b });

    for (i, msg) in ["first", "second", "third"].iter().enumerate() {
        a.enqueue(i as u8, msg.as_bytes()).unwrap();
    }

    for now in 0..10 {
        for frame in a.poll(now).unwrap() {
            info!("a received id={}: {:?}", frame.id(), frame.payload());
        }
        for frame in b.poll(now).unwrap() {
            info!(
                "b received id={}: {}",
                frame.id(),
                String::from_utf8_lossy(frame.payload())
            );
        }
    }

    info!("a has {} unacknowledged frame(s) left", a.pending());
}
