use crate::spec::ElementType;

/// Scoped writer for one length-prefixed document or array inside a byte buffer.
///
/// Opening reserves the four-byte length; dropping the writer appends the terminator and
/// back-patches the length, so the enclosing bytes stay well-formed on every exit path.
pub(crate) struct DocWriter<'a> {
    data: &'a mut Vec<u8>,
    start: usize,
}

impl<'a> DocWriter<'a> {
    pub(crate) fn open(data: &'a mut Vec<u8>) -> Self {
        let start = data.len();
        data.extend(super::MIN_BSON_DOCUMENT_SIZE.to_le_bytes());
        Self { data, start }
    }

    /// Appends an element header: the type tag followed by the name as a C string.
    pub(crate) fn append_key(&mut self, element_type: ElementType, name: &str) {
        self.data.push(element_type as u8);
        self.data.extend_from_slice(name.as_bytes());
        self.data.push(0);
    }

    pub(crate) fn buffer(&mut self) -> &mut Vec<u8> {
        self.data
    }
}

impl Drop for DocWriter<'_> {
    fn drop(&mut self) {
        self.data.push(0);
        let new_len = ((self.data.len() - self.start) as i32).to_le_bytes();
        self.data[self.start..self.start + 4].copy_from_slice(&new_len);
    }
}
