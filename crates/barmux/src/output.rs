use std::io::Write;

use anyhow::{Context, Result};
use barmux_protocol::{Block, Header};
use itertools::Itertools;

use crate::worker::WorkerKey;

/// Assembles the status line and writes protocol frames to a writer,
/// normally stdout.
///
/// There is one slot per position in the configured order. A slot holds
/// the serialized fragment of its worker's blocks, already comma-joined
/// when a worker emits more than one block. Frames are only written when
/// a slot actually changed, so identical consecutive states cost nothing.
pub struct OutputAssembler {
    writer: Box<dyn Write + Send>,
    slots: Vec<Option<String>>,
    header: Header,
    dirty: bool,
}

impl OutputAssembler {
    pub fn new(writer: Box<dyn Write + Send>, slot_count: usize, header: Header) -> Self {
        OutputAssembler { writer, slots: vec![None; slot_count], header, dirty: false }
    }

    /// Protocol preamble: the header object, the infinite-array opener and
    /// one empty frame so the bar renders immediately.
    pub fn write_header(&mut self) -> Result<()> {
        let header = serde_json::to_string(&self.header).context("Failed to serialize the protocol header")?;
        writeln!(self.writer, "{}", header)?;
        writeln!(self.writer, "[")?;
        writeln!(self.writer, "[]")?;
        self.writer.flush().context("Failed to write the protocol header")?;
        Ok(())
    }

    /// Put `fragment` into every position in `positions`. Returns whether
    /// anything changed.
    pub fn set_slots(&mut self, positions: &[usize], fragment: Option<String>) -> bool {
        let mut changed = false;
        for &position in positions {
            match self.slots.get_mut(position) {
                Some(slot) if *slot != fragment => {
                    *slot = fragment.clone();
                    changed = true;
                }
                Some(_) => {}
                None => log::error!("Ignoring out of range slot {}", position),
            }
        }
        self.dirty |= changed;
        changed
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Write one frame if any slot changed since the last frame.
    pub fn emit_if_dirty(&mut self) -> Result<()> {
        if self.dirty {
            self.emit()?;
        }
        Ok(())
    }

    fn emit(&mut self) -> Result<()> {
        let body = self.slots.iter().flatten().join(",");
        writeln!(self.writer, ",[{}]", body)?;
        self.writer.flush().context("Failed to write a status frame")?;
        self.dirty = false;
        Ok(())
    }
}

/// Project a worker's blocks for display: tag them with the worker's name
/// and instance so clicks route back to it, fill in the module's default
/// color, or strip colors entirely when they are disabled.
pub fn render_fragment(blocks: &[Block], key: &WorkerKey, default_color: Option<&str>, colors: bool) -> Option<String> {
    if blocks.is_empty() {
        return None;
    }
    let fragment = blocks
        .iter()
        .map(|block| {
            let mut block = block.clone();
            if block.name.is_none() {
                block.name = Some(key.name.clone());
            }
            if block.instance.is_none() && !key.instance.is_empty() {
                block.instance = Some(key.instance.clone());
            }
            if !colors {
                block.color = None;
            } else if block.color.is_none() {
                block.color = default_color.map(str::to_string);
            }
            serde_json::to_string(&block)
        })
        .collect::<Result<Vec<_>, _>>();
    match fragment {
        Ok(parts) => Some(parts.join(",")),
        Err(err) => {
            log::error!("Failed to serialize blocks of {}: {}", key, err);
            None
        }
    }
}

/// Whether an error came from writing to a closed status line reader.
/// That is how the process learns that the bar is gone.
pub fn is_broken_pipe(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<std::io::Error>())
        .any(|io| io.kind() == std::io::ErrorKind::BrokenPipe)
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn assembler(slot_count: usize) -> (OutputAssembler, SharedBuf) {
        let buf = SharedBuf::default();
        (OutputAssembler::new(Box::new(buf.clone()), slot_count, Header::default()), buf)
    }

    #[test]
    fn preamble_matches_the_protocol() {
        let (mut out, buf) = assembler(0);
        out.write_header().unwrap();
        assert_eq!(buf.contents(), "{\"version\":1,\"click_events\":true,\"stop_signal\":20}\n[\n[]\n");
    }

    #[test]
    fn frames_skip_empty_slots() {
        let (mut out, buf) = assembler(3);
        out.set_slots(&[0], Some("{\"full_text\":\"a\"}".to_string()));
        out.set_slots(&[2], Some("{\"full_text\":\"c\"}".to_string()));
        out.emit_if_dirty().unwrap();
        assert_eq!(buf.contents(), ",[{\"full_text\":\"a\"},{\"full_text\":\"c\"}]\n");
    }

    #[test]
    fn unchanged_content_is_not_rewritten() {
        let (mut out, buf) = assembler(1);
        assert!(out.set_slots(&[0], Some("x".to_string())));
        out.emit_if_dirty().unwrap();
        assert!(!out.set_slots(&[0], Some("x".to_string())));
        out.emit_if_dirty().unwrap();
        out.emit_if_dirty().unwrap();
        assert_eq!(buf.contents(), ",[x]\n");
    }

    #[test]
    fn one_worker_may_fill_several_positions() {
        let (mut out, buf) = assembler(3);
        out.set_slots(&[0, 2], Some("w".to_string()));
        out.set_slots(&[1], Some("m".to_string()));
        out.emit_if_dirty().unwrap();
        assert_eq!(buf.contents(), ",[w,m,w]\n");
    }

    #[test]
    fn clearing_the_last_slot_emits_an_empty_frame() {
        let (mut out, buf) = assembler(1);
        out.set_slots(&[0], Some("x".to_string()));
        out.emit_if_dirty().unwrap();
        out.set_slots(&[0], None);
        out.emit_if_dirty().unwrap();
        assert_eq!(buf.contents(), ",[x]\n,[]\n");
    }

    #[test]
    fn fragments_are_tagged_and_colored() {
        let key = WorkerKey { name: "battery".to_string(), instance: "0".to_string() };
        let blocks = vec![Block::new("85%")];
        let fragment = render_fragment(&blocks, &key, Some("#00ff00"), true).unwrap();
        assert_eq!(fragment, "{\"full_text\":\"85%\",\"color\":\"#00ff00\",\"name\":\"battery\",\"instance\":\"0\"}");
    }

    #[test]
    fn disabling_colors_strips_them() {
        let key = WorkerKey { name: "x".to_string(), instance: String::new() };
        let mut block = Block::new("t");
        block.color = Some("#123456".to_string());
        let fragment = render_fragment(&[block], &key, Some("#ffffff"), false).unwrap();
        assert_eq!(fragment, "{\"full_text\":\"t\",\"name\":\"x\"}");
    }

    #[test]
    fn a_blocks_own_color_wins_over_the_default() {
        let key = WorkerKey { name: "x".to_string(), instance: String::new() };
        let mut block = Block::new("t");
        block.color = Some("#123456".to_string());
        let fragment = render_fragment(&[block], &key, Some("#ffffff"), true).unwrap();
        assert!(fragment.contains("#123456"));
        assert!(!fragment.contains("#ffffff"));
    }

    #[test]
    fn empty_block_lists_render_nothing() {
        let key = WorkerKey { name: "x".to_string(), instance: String::new() };
        assert_eq!(render_fragment(&[], &key, None, true), None);
    }

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
        }
    }

    #[test]
    fn broken_pipes_are_recognized() {
        let mut out = OutputAssembler::new(Box::new(ClosedPipe), 1, Header::default());
        out.set_slots(&[0], Some("x".to_string()));
        let err = out.emit_if_dirty().unwrap_err();
        assert!(is_broken_pipe(&err));
        assert!(!is_broken_pipe(&anyhow::anyhow!("something else")));
    }
}
