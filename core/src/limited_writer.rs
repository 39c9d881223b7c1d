/// Cap on each captured standard stream, 1 MiB.
pub const STD_STREAM_LIMIT: usize = 1024 * 1024;

/// Byte sink with a hard size cap. Writing never errors: once `limit` bytes
/// have been retained, later bytes are dropped and `exceeded` stays set.
#[derive(Debug)]
pub struct LimitedWriter {
    content: Vec<u8>,
    remaining: usize,
    exceeded: bool,
}

impl LimitedWriter {
    pub fn new(limit: usize) -> Self {
        Self {
            content: Vec::new(),
            remaining: limit,
            exceeded: false,
        }
    }

    pub fn write(&mut self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        if self.remaining == 0 {
            self.exceeded = true;
            return;
        }
        let take = chunk.len().min(self.remaining);
        if take < chunk.len() {
            self.exceeded = true;
        }
        self.content.extend_from_slice(&chunk[..take]);
        self.remaining -= take;
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn exceeded(&self) -> bool {
        self.exceeded
    }

    pub fn into_captured(self) -> CapturedStream {
        CapturedStream {
            text: String::from_utf8_lossy(&self.content).into_owned(),
            truncated: self.exceeded,
        }
    }
}

/// What a run hands back for one standard stream: the retained text and
/// whether the cap cut it short.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CapturedStream {
    pub text: String,
    pub truncated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn retains_exactly_the_first_limit_bytes() {
        let mut writer = LimitedWriter::new(5);
        writer.write(b"abc");
        writer.write(b"defg");
        assert_eq!(b"abcde", writer.content());
        assert!(writer.exceeded());
    }

    #[test]
    fn filling_to_the_limit_exactly_is_not_truncation() {
        let mut writer = LimitedWriter::new(1);
        writer.write(b"1");
        assert_eq!(b"1", writer.content());
        assert_eq!(false, writer.exceeded());

        writer.write(b"2");
        assert_eq!(b"1", writer.content());
        assert_eq!(true, writer.exceeded());
    }

    #[test]
    fn exceeded_is_sticky() {
        let mut writer = LimitedWriter::new(2);
        writer.write(b"abcd");
        writer.write(b"e");
        assert_eq!(b"ab", writer.content());
        assert!(writer.exceeded());
    }

    #[test]
    fn zero_length_writes_never_set_exceeded() {
        let mut writer = LimitedWriter::new(0);
        writer.write(b"");
        assert_eq!(false, writer.exceeded());

        let mut writer = LimitedWriter::new(1);
        writer.write(b"1");
        writer.write(b"");
        assert_eq!(false, writer.exceeded());
    }

    #[test]
    fn converts_into_a_captured_stream() {
        let mut writer = LimitedWriter::new(3);
        writer.write(b"hi there");
        assert_eq!(
            CapturedStream {
                text: "hi ".to_string(),
                truncated: true,
            },
            writer.into_captured()
        );
    }
}
