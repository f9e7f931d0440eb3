use anyhow::ensure;
use bytes::Buf;

/// Checked reads over a [`Buf`], so that a short datagram surfaces as an
/// `Err` instead of a panic.
pub(crate) trait BufExt: Buf {
    fn read_u8(&mut self) -> crate::Result<u8> {
        ensure!(self.remaining() >= 1, "buffer exhausted");
        Ok(self.get_u8())
    }

    fn read_u16_be(&mut self) -> crate::Result<u16> {
        ensure!(self.remaining() >= 2, "buffer exhausted");
        Ok(self.get_u16())
    }
}

impl<B: Buf> BufExt for B {}
