//! Scans a plan file character by character.

use std::path::Path;

#[derive(Debug)]
pub struct ParseError {
    msg: String,
    ofs: usize,
}
pub type ParseResult<T> = Result<T, ParseError>;

pub struct Scanner<'a> {
    buf: &'a str,
    pub ofs: usize,
    pub line: usize,
}

impl<'a> Scanner<'a> {
    /// `buf` must end in a nul, which serves as the end-of-input marker.
    pub fn new(buf: &'a str) -> Self {
        if !buf.ends_with('\0') {
            panic!("Scanner requires nul-terminated buf");
        }
        Scanner {
            buf,
            ofs: 0,
            line: 1,
        }
    }

    pub fn slice(&self, start: usize, end: usize) -> &'a str {
        &self.buf[start..end]
    }

    pub fn peek(&self) -> char {
        self.buf.as_bytes()[self.ofs] as char
    }

    pub fn at_eof(&self) -> bool {
        self.ofs >= self.buf.len() - 1
    }

    pub fn next(&mut self) {
        if self.peek() == '\n' {
            self.line += 1;
        }
        if self.ofs == self.buf.len() {
            panic!("scanned past end")
        }
        self.ofs += 1;
    }

    pub fn read(&mut self) -> char {
        let c = self.peek();
        self.next();
        c
    }

    pub fn skip(&mut self, ch: char) -> bool {
        if self.peek() == ch {
            self.next();
            return true;
        }
        false
    }

    /// Skips spaces and tabs, returning how many were skipped.
    pub fn skip_spaces(&mut self) -> usize {
        let start = self.ofs;
        while self.skip(' ') || self.skip('\t') {}
        self.ofs - start
    }

    /// Skips to the start of the next line.
    pub fn skip_line(&mut self) {
        while !self.at_eof() && self.read() != '\n' {}
    }

    /// Reads up to the next whitespace, `=` or end of line.
    pub fn read_word(&mut self) -> &'a str {
        let start = self.ofs;
        while !self.at_eof() && !matches!(self.peek(), ' ' | '\t' | '\r' | '\n' | '=') {
            self.next();
        }
        self.slice(start, self.ofs)
    }

    /// Reads the rest of the line, trimmed, and moves past the newline.
    pub fn read_to_eol(&mut self) -> &'a str {
        let start = self.ofs;
        while !self.at_eof() && self.peek() != '\n' {
            self.next();
        }
        let text = self.slice(start, self.ofs).trim();
        self.skip('\n');
        text
    }

    pub fn expect(&mut self, ch: char) -> ParseResult<()> {
        if self.peek() != ch {
            return self.parse_error(format!("expected {:?}, got {:?}", ch, self.peek()));
        }
        self.next();
        Ok(())
    }

    pub fn parse_error<T, S: Into<String>>(&self, msg: S) -> ParseResult<T> {
        Err(ParseError {
            msg: msg.into(),
            ofs: self.ofs,
        })
    }

    pub fn format_parse_error(&self, filename: &Path, err: ParseError) -> String {
        let mut ofs = 0;
        for (line_number, line) in self.buf.split('\n').enumerate() {
            if ofs + line.len() >= err.ofs {
                let line = line.trim_end_matches('\0');
                let prefix = format!("{}:{}: ", filename.display(), line_number + 1);
                let col = (err.ofs - ofs).min(line.len());
                return format!(
                    "parse error: {}\n{}{}\n{}^\n",
                    err.msg,
                    prefix,
                    line,
                    " ".repeat(prefix.len() + col)
                );
            }
            ofs += line.len() + 1;
        }
        format!("parse error: {}\n{}: at end of file\n", err.msg, filename.display())
    }
}
