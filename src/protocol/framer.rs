//! End-of-statement detection in the shell's merged output.
//!
//! The framer is a pure scanner: the reader task owns the byte buffer and
//! asks the framer how much of it is request data and whether the marker
//! line has been seen. A marker only counts at the start of a line. Bytes
//! that might be the beginning of a marker are left in the caller's buffer
//! (see [`Framer::pending`]) until enough input arrives to decide.

use super::marker::Marker;

/// Outcome of one [`Framer::scan`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scan {
    /// `buf[..n]` is request data. Bytes after it are a tentative marker
    /// prefix that must stay at the front of the buffer.
    Data(usize),
    /// `buf[..data]` is the last data of the request and `buf[..consumed]`
    /// includes the marker line.
    Boundary { data: usize, consumed: usize },
}

/// Marker scanner for one connection's output stream.
#[derive(Debug, Clone)]
pub struct Framer {
    marker: Vec<u8>,
    matched: usize,
    prev: u8,
}

impl Framer {
    pub fn new(marker: &Marker) -> Self {
        Self {
            marker: marker.line(),
            matched: 0,
            prev: b'\n',
        }
    }

    /// Switch to the marker of the next request.
    ///
    /// Only called between requests, when no partial match is pending.
    pub fn expect(&mut self, marker: &Marker) {
        debug_assert_eq!(self.matched, 0, "marker switched mid-match");
        self.marker = marker.line();
    }

    /// Number of bytes at the front of the buffer that form a partial
    /// marker match and have already been examined.
    pub fn pending(&self) -> usize {
        self.matched
    }

    /// Scan `buf`, whose first [`pending`](Self::pending) bytes were kept
    /// from the previous call.
    pub fn scan(&mut self, buf: &[u8]) -> Scan {
        let mut data = 0;
        while data + self.matched < buf.len() {
            let c = buf[data + self.matched];
            if self.matched == 0 && self.prev != b'\n' {
                data += 1;
            } else if c == self.marker[self.matched] {
                self.matched += 1;
                if self.matched == self.marker.len() {
                    let consumed = data + self.matched;
                    self.matched = 0;
                    self.prev = c;
                    return Scan::Boundary { data, consumed };
                }
            } else {
                // resume just past the mismatch
                data += self.matched + 1;
                self.matched = 0;
            }
            self.prev = c;
        }
        Scan::Data(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drive a framer the way the reader task does, returning the data of
    /// each completed request and the data of the unfinished one.
    fn frames(markers: &[Marker], chunks: &[&[u8]]) -> (Vec<Vec<u8>>, Vec<u8>) {
        let mut markers = markers.iter();
        let mut framer = Framer::new(markers.next().expect("at least one marker"));
        let mut buf = Vec::new();
        let mut done = Vec::new();
        let mut current = Vec::new();
        for chunk in chunks {
            buf.extend_from_slice(chunk);
            while buf.len() > framer.pending() {
                match framer.scan(&buf) {
                    Scan::Data(n) => {
                        current.extend_from_slice(&buf[..n]);
                        buf.drain(..n);
                        break;
                    }
                    Scan::Boundary { data, consumed } => {
                        current.extend_from_slice(&buf[..data]);
                        done.push(std::mem::take(&mut current));
                        buf.drain(..consumed);
                        if let Some(next) = markers.next() {
                            framer.expect(next);
                        }
                    }
                }
            }
        }
        (done, current)
    }

    fn bytewise(input: &[u8]) -> Vec<&[u8]> {
        input.chunks(1).collect()
    }

    #[test]
    fn finds_marker_after_rows() {
        let input = b"'a'\n1\n'''\n";
        let (done, rest) = frames(&[Marker::inert()], &[input]);
        assert_eq!(done, vec![b"'a'\n1\n".to_vec()]);
        assert!(rest.is_empty());
    }

    #[test]
    fn empty_output_yields_empty_frame() {
        let (done, _) = frames(&[Marker::inert()], &[b"'''\n"]);
        assert_eq!(done, vec![Vec::<u8>::new()]);
    }

    #[test]
    fn byte_at_a_time_matches_whole_delivery() {
        let input = b"'x','y'\n'''',X'00'\n1,2.5\n'''\n";
        let whole = frames(&[Marker::inert()], &[input]);
        let split = frames(&[Marker::inert()], &bytewise(input));
        assert_eq!(whole, split);
        assert_eq!(whole.0, vec![b"'x','y'\n'''',X'00'\n1,2.5\n".to_vec()]);
    }

    #[test]
    fn marker_not_at_line_start_is_data() {
        let input = b"1'''\n'''\n";
        let (done, _) = frames(&[Marker::inert()], &bytewise(input));
        assert_eq!(done, vec![b"1'''\n".to_vec()]);
    }

    #[test]
    fn partial_match_resumes_after_mismatch() {
        let input = b"''x\n'\n'''\n";
        let (done, _) = frames(&[Marker::inert()], &[input]);
        assert_eq!(done, vec![b"''x\n'\n".to_vec()]);
    }

    #[test]
    fn four_quote_line_is_not_a_marker() {
        // the quoted string "'" renders as ''''
        let input = b"''''\n'''\n";
        let (done, _) = frames(&[Marker::inert()], &bytewise(input));
        assert_eq!(done, vec![b"''''\n".to_vec()]);
    }

    #[test]
    fn partial_marker_at_end_of_read_is_held_back() {
        let (done, rest) = frames(&[Marker::inert()], &[b"1\n''"]);
        assert!(done.is_empty());
        assert_eq!(rest, b"1\n".to_vec());
    }

    #[test]
    fn one_boundary_per_request_in_shared_read() {
        let markers = [Marker::inert(), Marker::inert()];
        let (done, rest) = frames(&markers, &[b"1\n'''\n2\n'''\n"]);
        assert_eq!(done, vec![b"1\n".to_vec(), b"2\n".to_vec()]);
        assert!(rest.is_empty());
    }

    #[test]
    fn inert_marker_collides_with_bare_marker_line() {
        // Unquoted output such as `.print` text or a multi-line error can
        // contain the inert token on its own line and ends the frame early.
        let input = b"Parse error: near line 1\n'''\n  ^--- here\n'''\n";
        let (done, rest) = frames(&[Marker::inert()], &[input]);
        assert_eq!(done.len(), 2, "one request produced two boundaries");
        assert_eq!(done[0], b"Parse error: near line 1\n".to_vec());
        assert_eq!(done[1], b"  ^--- here\n".to_vec());
        assert!(rest.is_empty());
    }

    #[test]
    fn quoted_line_break_collides_with_inert_marker() {
        // the text "a\n'" is printed as 'a followed by a line holding '''
        let input = b"'s'\n'a\n'''\n'''\n";
        let (done, _) = frames(&[Marker::inert(), Marker::inert()], &[input]);
        assert_eq!(done[0], b"'s'\n'a\n".to_vec(), "request ended early");
        assert_eq!(done[1], Vec::<u8>::new(), "real marker charged to the next request");
    }

    #[test]
    fn unique_marker_survives_quoted_line_break() {
        let marker = Marker::unique();
        let mut input = b"'s'\n'a\n'''\n".to_vec();
        input.extend_from_slice(&marker.line());
        for chunks in [vec![input.as_slice()], bytewise(&input)] {
            let (done, rest) = frames(std::slice::from_ref(&marker), &chunks);
            assert_eq!(done, vec![b"'s'\n'a\n'''\n".to_vec()]);
            assert!(rest.is_empty());
        }
    }

    #[test]
    fn unique_marker_survives_bare_inert_line() {
        let marker = Marker::unique();
        let mut input = b"Parse error: near line 1\n'''\n  ^--- here\n".to_vec();
        input.extend_from_slice(&marker.line());
        let (done, rest) = frames(&[marker], &bytewise(&input));
        assert_eq!(
            done,
            vec![b"Parse error: near line 1\n'''\n  ^--- here\n".to_vec()]
        );
        assert!(rest.is_empty());
    }
}
