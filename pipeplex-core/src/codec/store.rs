use super::{Codec, Handle, SinkWriter, close_buffered};
use crate::error::Result;
use std::io::{BufWriter, Read, Write};

pub struct Store;

pub struct StoreWriter {
    buf: BufWriter<Handle>,
}

impl Write for StoreWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buf.write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.buf.flush()
    }
}

impl SinkWriter for StoreWriter {
    fn close(self: Box<Self>) -> Result<()> {
        close_buffered(self.buf);
        Ok(())
    }
}

impl Codec for Store {
    fn encoder(&self, dst: BufWriter<Handle>, _level: i32) -> Result<Box<dyn SinkWriter>> {
        Ok(Box::new(StoreWriter { buf: dst }))
    }

    fn decoder(&self, src: Box<dyn Read>) -> Result<Box<dyn Read>> {
        Ok(src)
    }
}
