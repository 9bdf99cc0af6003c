//! # Newick Reader
//!
//! Stack-based parser for Newick trees. Accepts quoted labels
//! (`'a label'`, with `''` as an escaped quote), internal node labels,
//! branch lengths and `[...]` comments. Internal labels and branch lengths
//! are validated but not kept: the factorization only uses topology.

use crate::error::{PhyloFactorError, Result};
use crate::tree::RawNode;

const DELIMITERS: &[u8] = b"()[]':;,";

struct Parser<'a> {
    text: &'a str,
    pos: usize,
    nodes: Vec<RawNode>,
}

/// Parse Newick text into an arena and the index of its root.
pub(crate) fn parse(text: &str) -> Result<(Vec<RawNode>, usize)> {
    let mut parser = Parser {
        text,
        pos: 0,
        nodes: Vec::new(),
    };

    parser.skip_trivia()?;
    if parser.peek().is_none() {
        return Err(PhyloFactorError::newick(0, "empty tree"));
    }
    let root = parser.subtree()?;
    parser.skip_trivia()?;
    match parser.peek() {
        Some(b';') => parser.pos += 1,
        _ => return Err(parser.error("expected ';' after tree")),
    }
    parser.skip_trivia()?;
    if parser.peek().is_some() {
        return Err(parser.error("unexpected characters after ';'"));
    }
    Ok((parser.nodes, root))
}

/// Quote a label when it contains Newick metacharacters or whitespace.
pub fn quote_label(label: &str) -> String {
    let needs_quotes = label
        .bytes()
        .any(|b| DELIMITERS.contains(&b) || b.is_ascii_whitespace());
    if needs_quotes {
        format!("'{}'", label.replace('\'', "''"))
    } else {
        label.to_string()
    }
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<u8> {
        self.text.as_bytes().get(self.pos).copied()
    }

    fn error(&self, message: impl Into<String>) -> PhyloFactorError {
        PhyloFactorError::newick(self.pos, message)
    }

    /// Skip whitespace and bracketed comments.
    fn skip_trivia(&mut self) -> Result<()> {
        loop {
            match self.peek() {
                Some(b) if b.is_ascii_whitespace() => self.pos += 1,
                Some(b'[') => {
                    let start = self.pos;
                    match self.text[self.pos..].find(']') {
                        Some(offset) => self.pos += offset + 1,
                        None => return Err(PhyloFactorError::newick(start, "unterminated comment")),
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn subtree(&mut self) -> Result<usize> {
        // Open parentheses with their start offset and the children parsed so far
        let mut open: Vec<(usize, Vec<usize>)> = Vec::new();

        loop {
            self.skip_trivia()?;
            let start = self.pos;
            if self.peek() == Some(b'(') {
                self.pos += 1;
                open.push((start, Vec::new()));
                continue;
            }

            let mut node = self.finish_node(start, Vec::new())?;
            loop {
                let Some((_, children)) = open.last_mut() else {
                    return Ok(node);
                };
                children.push(node);
                self.skip_trivia()?;
                match self.peek() {
                    Some(b',') => {
                        self.pos += 1;
                        break;
                    }
                    Some(b')') => {
                        self.pos += 1;
                        let Some((start, children)) = open.pop() else {
                            return Err(self.error("unbalanced parenthesis"));
                        };
                        node = self.finish_node(start, children)?;
                    }
                    Some(_) => return Err(self.error("expected ',' or ')'")),
                    None => return Err(self.error("unbalanced parenthesis")),
                }
            }
        }
    }

    /// Reads the label and branch length closing a node and stores it.
    fn finish_node(&mut self, start: usize, children: Vec<usize>) -> Result<usize> {
        let label = self.label()?;
        self.branch_length()?;

        if children.is_empty() && label.is_none() {
            return Err(PhyloFactorError::newick(start, "tip without a label"));
        }

        self.nodes.push(RawNode {
            label: if children.is_empty() { label } else { None },
            children,
        });
        Ok(self.nodes.len() - 1)
    }

    fn label(&mut self) -> Result<Option<String>> {
        self.skip_trivia()?;
        if self.peek() == Some(b'\'') {
            let start = self.pos;
            self.pos += 1;
            let mut label = String::new();
            loop {
                let rest = &self.text[self.pos..];
                let Some(offset) = rest.find('\'') else {
                    return Err(PhyloFactorError::newick(start, "unterminated quoted label"));
                };
                label.push_str(&rest[..offset]);
                self.pos += offset + 1;
                if self.peek() == Some(b'\'') {
                    label.push('\'');
                    self.pos += 1;
                } else {
                    return Ok(Some(label));
                }
            }
        }

        let start = self.pos;
        while let Some(b) = self.peek() {
            if DELIMITERS.contains(&b) || b.is_ascii_whitespace() {
                break;
            }
            self.pos += 1;
        }
        if self.pos == start {
            Ok(None)
        } else {
            Ok(Some(self.text[start..self.pos].to_string()))
        }
    }

    fn branch_length(&mut self) -> Result<Option<f64>> {
        self.skip_trivia()?;
        if self.peek() != Some(b':') {
            return Ok(None);
        }
        self.pos += 1;
        self.skip_trivia()?;
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_digit() || matches!(b, b'.' | b'-' | b'+' | b'e' | b'E') {
                self.pos += 1;
            } else {
                break;
            }
        }
        self.text[start..self.pos]
            .parse::<f64>()
            .map(Some)
            .map_err(|_| PhyloFactorError::newick(start, "invalid branch length"))
    }
}
