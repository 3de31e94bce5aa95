use super::{Codec, Handle, SinkWriter, close_buffered};
use crate::error::Result;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use std::io::{BufWriter, Read, Write};

pub struct GzipCodec;

pub struct GzipWriter {
    enc: GzEncoder<BufWriter<Handle>>,
}

impl Write for GzipWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.enc.write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.enc.flush()
    }
}

impl SinkWriter for GzipWriter {
    fn close(self: Box<Self>) -> Result<()> {
        // On error the encoder drops the buffer and handle with it.
        let buf = self.enc.finish()?;
        close_buffered(buf);
        Ok(())
    }
}

impl Codec for GzipCodec {
    fn encoder(&self, dst: BufWriter<Handle>, level: i32) -> Result<Box<dyn SinkWriter>> {
        let level = flate2::Compression::new(level.clamp(1, 9) as u32);
        Ok(Box::new(GzipWriter {
            enc: GzEncoder::new(dst, level),
        }))
    }

    fn decoder(&self, src: Box<dyn Read>) -> Result<Box<dyn Read>> {
        // Multi-member so resumed backups decode as one stream.
        Ok(Box::new(MultiGzDecoder::new(src)))
    }
}
