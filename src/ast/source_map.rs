/// Translates byte offsets into 1-based line/column pairs for the
/// diagnostic renderers.
pub struct SourceMap {
    starts: Vec<usize>,
}

impl SourceMap {
    pub fn new(source: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(
            source
                .bytes()
                .enumerate()
                .filter(|&(_, b)| b == b'\n')
                .map(|(i, _)| i + 1),
        );
        SourceMap { starts }
    }

    /// 1-based (line, column) of a byte offset.
    pub fn line_col(&self, offset: usize) -> (usize, usize) {
        let line = self.starts.partition_point(|&s| s <= offset).max(1);
        (line, offset - self.starts[line - 1] + 1)
    }

    /// Text of the given 1-based line, without its newline.
    pub fn line<'s>(&self, source: &'s str, line: usize) -> &'s str {
        if line == 0 || line > self.starts.len() {
            return "";
        }
        let start = self.starts[line - 1];
        let end = self
            .starts
            .get(line)
            .copied()
            .unwrap_or(source.len());
        source[start..end].trim_end_matches(['\n', '\r'])
    }
}
