//! Property-based tests for marker matching

use openwrt_vm_setup::console::ConsoleIo;
use openwrt_vm_setup::{Console, Pattern, Result, Transcript};
use proptest::prelude::*;
use std::collections::VecDeque;
use std::time::Duration;

const MARKER: &str = "Please press Enter to activate this console.";

/// Transport handing out fixed chunks, then ending
struct Chunks(VecDeque<Vec<u8>>);

#[async_trait::async_trait]
impl ConsoleIo for Chunks {
    async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.0.pop_front())
    }

    async fn write_all(&mut self, _data: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// Split `data` at the given cut points (taken modulo its length)
fn split(data: &[u8], cuts: &[usize]) -> VecDeque<Vec<u8>> {
    let mut points: Vec<usize> = cuts.iter().map(|c| c % (data.len() + 1)).collect();
    points.push(0);
    points.push(data.len());
    points.sort_unstable();
    points.dedup();
    points.windows(2).map(|w| data[w[0]..w[1]].to_vec()).collect()
}

fn expect_in(chunks: VecDeque<Vec<u8>>, pattern: &Pattern) -> Option<(String, Vec<u8>)> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();
    runtime.block_on(async {
        let mut console = Console::new(Chunks(chunks), Transcript::sink());
        console
            .expect(pattern, Duration::from_secs(5))
            .await
            .ok()
            .map(|found| (found.before, console.pending_output().to_vec()))
    })
}

proptest! {
    #[test]
    fn test_marker_found_at_any_chunk_boundary(
        prefix in "[a-z0-9 .\\[\\]\r\n]{0,200}",
        suffix in "[a-z0-9 \r\n]{0,50}",
        cuts in prop::collection::vec(any::<usize>(), 0..8),
    ) {
        let text = format!("{}{}{}", prefix, MARKER, suffix);
        let chunks = split(text.as_bytes(), &cuts);

        let (before, rest) = expect_in(chunks, &Pattern::literal(MARKER))
            .expect("marker must be found");
        prop_assert_eq!(before, prefix);
        prop_assert_eq!(rest, suffix.into_bytes());
    }

    #[test]
    fn test_prompt_regex_found_at_any_chunk_boundary(
        noise in "[a-z ]{0,100}",
        host in "[A-Za-z][A-Za-z0-9-]{0,15}",
        cuts in prop::collection::vec(any::<usize>(), 0..6),
    ) {
        let text = format!("{}\r\nroot@{}:/# ", noise, host);
        let chunks = split(text.as_bytes(), &cuts);
        let prompt = Pattern::regex(r"root@.*:/#").unwrap();

        prop_assert!(expect_in(chunks, &prompt).is_some());
    }

    #[test]
    fn test_absent_marker_is_never_reported(
        text in "[a-z0-9 \r\n]{0,300}",
        cuts in prop::collection::vec(any::<usize>(), 0..8),
    ) {
        let chunks = split(text.as_bytes(), &cuts);
        prop_assert!(expect_in(chunks, &Pattern::literal(MARKER)).is_none());
    }

    #[test]
    fn test_literal_find_agrees_with_str_find(
        haystack in "\\PC{0,200}",
        needle in "\\PC{1,10}",
    ) {
        let expected = haystack.find(&needle).map(|start| (start, start + needle.len()));
        prop_assert_eq!(Pattern::literal(needle).find(haystack.as_bytes()), expected);
    }
}
