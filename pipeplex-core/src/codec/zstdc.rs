use super::{Codec, Handle, SinkWriter, close_buffered};
use crate::error::Result;
use std::io::{BufWriter, Read, Write};

pub struct ZstdCodec;

pub struct ZstdWriter {
    enc: zstd::stream::write::Encoder<'static, BufWriter<Handle>>,
}

impl Write for ZstdWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.enc.write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.enc.flush()
    }
}

impl SinkWriter for ZstdWriter {
    fn close(self: Box<Self>) -> Result<()> {
        let buf = self.enc.finish()?;
        close_buffered(buf);
        Ok(())
    }
}

impl Codec for ZstdCodec {
    fn encoder(&self, dst: BufWriter<Handle>, level: i32) -> Result<Box<dyn SinkWriter>> {
        let enc = zstd::stream::write::Encoder::new(dst, level.max(1))?;
        Ok(Box::new(ZstdWriter { enc }))
    }

    fn decoder(&self, src: Box<dyn Read>) -> Result<Box<dyn Read>> {
        let dec = zstd::stream::read::Decoder::new(src)?;
        Ok(Box::new(dec))
    }
}
