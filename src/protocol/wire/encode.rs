use bytes::BufMut;

/// A message that can serialize itself into an outgoing buffer.
pub(crate) trait Encode<B: BufMut> {
    fn encode(self, dst: &mut B) -> crate::Result<()>;
}
