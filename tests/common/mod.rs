#![allow(dead_code)]

use std::{
    thread,
    time::{Duration, Instant},
};

use bytes::Bytes;
use mill_nio::prelude::*;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn pool(reactors: usize) -> ReactorPool {
    init_logging();
    ReactorPool::new(
        ReactorPoolConfig::builder()
            .reactors(reactors)
            .poll_timeout(Duration::from_millis(20))
            .build(),
    )
    .unwrap()
}

pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

/// Encodes an ack-framing request carrying `len` filler bytes.
pub fn frame(len: usize) -> Vec<u8> {
    let mut frame = (len as u32).to_be_bytes().to_vec();
    frame.resize(4 + len, 0x5A);
    frame
}

pub struct Echo;

impl IoHandler for Echo {
    fn message_received(&self, session: &Session, message: Bytes) -> Result<()> {
        session.write(message);
        Ok(())
    }
}
