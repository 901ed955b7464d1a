//! Deferred text buffer (§4.C).
//!
//! The generator often has to decide "does this helper get emitted?"
//! long after it has already started writing the function body that
//! consumes it. [`SBuf`] is an append-only text node whose content is a
//! list of spans interleaved with pointers to child nodes; a child can be
//! filled in at any later time via [`Arena::splice`] or
//! [`Arena::deferred_fn`]. Flushing ([`Arena::flush`]) is a depth-first
//! walk of the node tree, and applies brace-aware indentation as it
//! streams literal text to the output.
//!
//! Rather than raw pointers and manual lifetime bookkeeping (as the
//! textual spec describes), buffers live in an [`Arena`]: a single owning
//! `Vec<Buffer>` indexed by [`SBuf`] handles. This gives the "DAG of
//! buffers, freed en masse at exit" resource policy of §5 for free —
//! the whole arena drops at once, and a handle can't outlive it because
//! it never leaves the functions that build the tree.

use crate::error::{GenError, Result};
use std::fmt::Write as _;

/// A handle to one buffer inside an [`Arena`]. Cheap to copy; meaningless
/// outside the arena that produced it.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct SBuf(usize);

/// A callback that lazily populates a child buffer the first time the
/// flush walker reaches it. Used for helpers like the CRC lookup table,
/// whose *position* in the output must be fixed early but whose content
/// should only appear if some later emitter actually demands it.
pub type DeferredFn<'a> = Box<dyn FnOnce(&mut Arena, SBuf) + 'a>;

enum Chunk<'a> {
    Text(String),
    Deferred(SBuf),
    DeferredFn(Option<DeferredFn<'a>>),
}

struct Buffer<'a> {
    chunks: Vec<Chunk<'a>>,
}

/// Owns every [`SBuf`] created during one generation pass.
pub struct Arena<'a> {
    buffers: Vec<Buffer<'a>>,
}

impl<'a> Arena<'a> {
    pub fn new() -> Self {
        Arena {
            buffers: vec![Buffer { chunks: Vec::new() }],
        }
    }

    /// The arena's single root buffer, conventionally the top-level
    /// `#include` block or the top-level function body depending on
    /// which buffer the driver created this arena for.
    pub fn root(&self) -> SBuf {
        SBuf(0)
    }

    fn alloc(&mut self) -> SBuf {
        self.buffers.push(Buffer { chunks: Vec::new() });
        SBuf(self.buffers.len() - 1)
    }

    /// Appends literal text to `buf`.
    pub fn put_str(&mut self, buf: SBuf, text: &str) {
        match self.buffers[buf.0].chunks.last_mut() {
            Some(Chunk::Text(s)) => s.push_str(text),
            _ => self.buffers[buf.0].chunks.push(Chunk::Text(text.to_owned())),
        }
    }

    /// Appends formatted text, supporting only `%s` (string), `%u`
    /// (decimal), and `%x` (zero-padded 8-hex) — deliberately the narrow
    /// contract described in the design notes, not the host language's
    /// full formatter, so the mapping from format text to emitted C stays
    /// obvious on inspection.
    pub fn put_fmt(&mut self, buf: SBuf, fmt: &str, args: &[Arg]) {
        let mut out = String::new();
        let mut arg_iter = args.iter();
        let mut chars = fmt.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('s') => match arg_iter.next() {
                    Some(Arg::Str(s)) => out.push_str(s),
                    _ => out.push_str("%s"),
                },
                Some('u') => match arg_iter.next() {
                    Some(Arg::U(n)) => {
                        let _ = write!(out, "{n}");
                    }
                    _ => out.push_str("%u"),
                },
                Some('x') => match arg_iter.next() {
                    Some(Arg::U(n)) => {
                        let _ = write!(out, "{n:08x}");
                    }
                    _ => out.push_str("%x"),
                },
                Some(other) => {
                    out.push('%');
                    out.push(other);
                }
                None => out.push('%'),
            }
        }
        self.put_str(buf, &out);
    }

    /// Splices a new child buffer into `buf` at the current write
    /// position, and returns a handle the caller can keep writing into.
    /// Anything written to `buf` before this call appears before the
    /// child's content in the final output; anything written to `buf`
    /// after this call appears after it.
    pub fn splice(&mut self, buf: SBuf) -> SBuf {
        let child = self.alloc();
        self.buffers[buf.0].chunks.push(Chunk::Deferred(child));
        child
    }

    /// Reserves a lazy slot in `buf`: at flush time, a freshly-allocated
    /// child buffer is handed to `f`, which populates it before the walk
    /// continues. If `f` never gets called (e.g. the buffer tree is
    /// never flushed), nothing is emitted — but flush always runs
    /// exactly once per generation pass, so in practice this only
    /// matters for the ordering guarantee, not for whether `f` runs.
    pub fn deferred_fn<F>(&mut self, buf: SBuf, f: F)
    where
        F: FnOnce(&mut Arena, SBuf) + 'a,
    {
        self.buffers[buf.0]
            .chunks
            .push(Chunk::DeferredFn(Some(Box::new(f))));
    }

    /// Walks the buffer DAG from `root` in pre-order and renders it to a
    /// single string, applying brace-aware indentation as literal text is
    /// streamed through.
    pub fn flush(&mut self, root: SBuf) -> Result<String> {
        let mut writer = IndentWriter::new();
        self.flush_into(root, &mut writer)?;
        Ok(writer.finish())
    }

    fn flush_into(&mut self, buf: SBuf, writer: &mut IndentWriter) -> Result<()> {
        log::trace!("flushing buffer {} ({} chunks)", buf.0, self.buffers[buf.0].chunks.len());

        // Chunks are processed by index so that a DeferredFn callback
        // (which needs &mut self to populate its child) doesn't conflict
        // with an outstanding borrow of `self.buffers[buf.0]`.
        let mut i = 0;
        loop {
            let len = self.buffers[buf.0].chunks.len();
            if i >= len {
                break;
            }
            // Take ownership of the DeferredFn callback (if any) before
            // recursing, since populating the child needs `&mut self`.
            enum Step {
                Text(String),
                Recurse(SBuf),
            }
            let step = match &mut self.buffers[buf.0].chunks[i] {
                Chunk::Text(s) => Step::Text(s.clone()),
                Chunk::Deferred(child) => Step::Recurse(*child),
                Chunk::DeferredFn(slot) => {
                    let f = slot.take().expect("DeferredFn callback run twice");
                    let child = self.alloc();
                    log::trace!("populating deferred buffer {} from its callback", child.0);
                    f(self, child);
                    Step::Recurse(child)
                }
            };
            match step {
                Step::Text(s) => writer.write(&s)?,
                Step::Recurse(child) => self.flush_into(child, writer)?,
            }
            i += 1;
        }
        Ok(())
    }
}

/// An argument to [`Arena::put_fmt`].
pub enum Arg<'a> {
    Str(&'a str),
    U(u64),
}

const MAX_INDENT_DEPTH: usize = 16;

/// Streams literal text through brace-aware auto-indentation.
///
/// Rule: a `{` increments a pending-indent depth only if it is the last
/// non-whitespace character before the next newline (so braces inside
/// expressions, e.g. `{0, 1}`, don't indent); a matching `}` decrements
/// it. Runs of closing braces on an otherwise-empty line collapse onto
/// one line without extra indentation between them.
struct IndentWriter {
    out: String,
    /// Current committed indent depth (applied at each new line).
    depth: usize,
    /// For each currently-open `{` at depth `i`, whether it caused an
    /// indent (vs. being a braced initializer like `{0, 1}`).
    indent_stack: Vec<bool>,
    /// Text accumulated since the last newline, not yet committed — used
    /// to detect "is this `{` the last non-whitespace char before a
    /// newline" and "is this `}` starting an otherwise-empty line".
    pending_line: String,
    /// True once we've written the indent prefix for the current line.
    line_started: bool,
}

impl IndentWriter {
    fn new() -> Self {
        IndentWriter {
            out: String::new(),
            depth: 0,
            indent_stack: Vec::new(),
            pending_line: String::new(),
            line_started: false,
        }
    }

    fn write(&mut self, text: &str) -> Result<()> {
        for c in text.chars() {
            self.write_char(c)?;
        }
        Ok(())
    }

    fn write_char(&mut self, c: char) -> Result<()> {
        if c == '\n' {
            self.commit_line();
            self.out.push('\n');
            self.line_started = false;
            self.pending_line.clear();
            return Ok(());
        }

        if !self.line_started {
            // Indentation is applied once per line, at the first
            // character. A `}` that begins a line dedents one level
            // first (its matching `{` indented the *body*, not itself).
            // A run of closing braces already adjacent in the source
            // (no newline between them) therefore naturally shares that
            // single indent application and prints on one output line —
            // no special-casing needed beyond "only indent at line
            // start".
            let indent = if c == '}' {
                self.depth.saturating_sub(1)
            } else {
                self.depth
            };
            for _ in 0..indent {
                self.out.push_str("  ");
            }
            self.line_started = true;
        }

        match c {
            '{' => {
                self.indent_stack.push(false); // resolved when line commits
            }
            '}' => {
                if let Some(caused_indent) = self.indent_stack.pop() {
                    if caused_indent {
                        self.depth = self.depth.saturating_sub(1);
                    }
                } else {
                    return Err(GenError::IndentDepthExceeded);
                }
            }
            _ => {}
        }
        if self.indent_stack.len() > MAX_INDENT_DEPTH {
            return Err(GenError::IndentDepthExceeded);
        }

        self.out.push(c);
        self.pending_line.push(c);
        Ok(())
    }

    /// Called just before a newline is emitted: resolves whether the most
    /// recently opened (and still-open) `{` on this line caused an
    /// indent — true exactly when it's the last non-whitespace character
    /// on the line.
    fn commit_line(&mut self) {
        let trimmed = self.pending_line.trim_end();
        if trimmed.ends_with('{') {
            if let Some(slot) = self.indent_stack.last_mut() {
                if !*slot {
                    *slot = true;
                    self.depth += 1;
                }
            }
        }
    }

    fn finish(self) -> String {
        self.out
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn flush_text(text: &str) -> String {
        let mut arena = Arena::new();
        let root = arena.root();
        arena.put_str(root, text);
        arena.flush(root).unwrap()
    }

    #[test]
    fn empty_block_is_unindented() {
        assert_eq!(flush_text("{\n}\n"), "{\n}\n");
    }

    #[test]
    fn block_body_is_indented_two_spaces() {
        assert_eq!(flush_text("{\nfoo;\n}\n"), "{\n  foo;\n}\n");
    }

    #[test]
    fn brace_initializer_is_not_indented() {
        assert_eq!(
            flush_text("int x[] = {1,2,3};\n"),
            "int x[] = {1,2,3};\n"
        );
    }

    #[test]
    fn separately_newlined_closing_braces_each_get_their_own_line() {
        // Each `}` sits on its own source line (separated by `\n`), so
        // each gets its own dedented line — this is the ordinary
        // multi-scope-close rendering.
        assert_eq!(
            flush_text("{\n{\nfoo;\n}\n}\n"),
            "{\n  {\n    foo;\n  }\n}\n"
        );
    }

    #[test]
    fn adjacent_closing_braces_share_a_line() {
        // Two closing braces already adjacent in the source (no newline
        // between them) stay on one output line, sharing a single
        // indent application instead of each re-indenting.
        assert_eq!(flush_text("{\n{\n}}\n"), "{\n  {\n  }}\n");
    }

    #[test]
    fn splice_and_put_str_flush_in_dfs_order() {
        let mut arena = Arena::new();
        let root = arena.root();
        arena.put_str(root, "a");
        let child = arena.splice(root);
        arena.put_str(child, "b");
        arena.put_str(root, "c");
        assert_eq!(arena.flush(root).unwrap(), "abc");
    }

    #[test]
    fn deferred_fn_populates_lazily_at_flush_time() {
        let mut arena = Arena::new();
        let root = arena.root();
        arena.put_str(root, "before:");
        arena.deferred_fn(root, |arena, child| {
            arena.put_str(child, "lazy");
        });
        arena.put_str(root, ":after");
        assert_eq!(arena.flush(root).unwrap(), "before:lazy:after");
    }

    #[test]
    fn nested_splices_flush_depth_first() {
        let mut arena = Arena::new();
        let root = arena.root();
        let a = arena.splice(root);
        let b = arena.splice(a);
        arena.put_str(b, "innermost");
        arena.put_str(a, "-outer");
        arena.put_str(root, "-root");
        assert_eq!(arena.flush(root).unwrap(), "innermost-outer-root");
    }

    #[test]
    fn put_fmt_supports_s_u_x() {
        let mut arena = Arena::new();
        let root = arena.root();
        arena.put_fmt(
            root,
            "name=%s count=%u hex=%x",
            &[Arg::Str("crc"), Arg::U(7), Arg::U(0xAB)],
        );
        assert_eq!(
            arena.flush(root).unwrap(),
            "name=crc count=7 hex=000000ab"
        );
    }
}
