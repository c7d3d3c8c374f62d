//! Contract Tests for the Console Session
//!
//! A console session must find markers split across arbitrary chunks,
//! mirror every byte it reads, send lines terminated by Enter and give up
//! at its deadline. These tests exercise it over the PTY channel bridge and
//! over a real pseudoterminal.

#[path = "../test_utils/mod.rs"]
mod test_utils;

use openwrt_vm_setup::console::Match;
use openwrt_vm_setup::pty::{spawn_pty_process, PtyStreams, SpawnConfig};
use openwrt_vm_setup::{Console, Error, Pattern, ProcessControl, Transcript};
use std::sync::mpsc;
use std::time::Duration;
use test_utils::{SharedBuffer, StubConsole, BOOT_MARKER};

fn channel_console() -> (
    Console<PtyStreams>,
    tokio::sync::mpsc::UnboundedSender<Vec<u8>>,
    mpsc::Receiver<Vec<u8>>,
    SharedBuffer,
) {
    let (tx_out, rx_out) = tokio::sync::mpsc::unbounded_channel();
    let (tx_in, rx_in) = mpsc::channel();
    let transcript = SharedBuffer::default();
    let console = Console::new(
        PtyStreams::from_channels(rx_out, tx_in),
        Transcript::from_writer(transcript.clone()),
    );
    (console, tx_out, rx_in, transcript)
}

#[tokio::test]
async fn test_marker_split_across_channel_chunks() {
    let (mut console, tx_out, _rx_in, transcript) = channel_console();
    for chunk in ["[    1.2] init\r\nPlease pr", "ess Enter to act", "ivate this console.\r\n"] {
        tx_out.send(chunk.as_bytes().to_vec()).unwrap();
    }

    let found: Match = console
        .expect(&Pattern::literal(BOOT_MARKER), Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(found.before, "[    1.2] init\r\n");
    assert_eq!(found.matched, BOOT_MARKER);
    assert!(transcript.text().ends_with("this console.\r\n"));
}

#[tokio::test]
async fn test_lines_reach_the_writer_with_enter() {
    let (mut console, _tx_out, rx_in, _transcript) = channel_console();

    console.send_line("").await.unwrap();
    console
        .send_line("uci set network.lan.proto='dhcp'")
        .await
        .unwrap();

    assert_eq!(rx_in.recv().unwrap(), b"\r");
    assert_eq!(rx_in.recv().unwrap(), b"uci set network.lan.proto='dhcp'\r");
}

#[tokio::test]
async fn test_reader_shutdown_ends_the_wait() {
    let (mut console, tx_out, _rx_in, _transcript) = channel_console();
    tx_out.send(b"Kernel panic - not syncing".to_vec()).unwrap();
    drop(tx_out);

    let result = console
        .expect(&Pattern::literal(BOOT_MARKER), Duration::from_secs(5))
        .await;
    match result {
        Err(Error::ProcessEndedUnexpectedly { context }) => {
            assert!(context.contains(BOOT_MARKER))
        }
        other => panic!("unexpected result: {:?}", other.map(|m| m.matched)),
    }
    assert!(console.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_timeout_names_the_pattern() {
    let mut console = Console::new(StubConsole::new(), Transcript::sink());
    let prompt = Pattern::regex(r"root@.*:/#").unwrap();

    let err = console
        .expect(&prompt, Duration::from_secs(30))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ConsoleTimeout { .. }));
    assert!(err.to_string().contains("root@.*:/#"));
}

#[tokio::test(start_paused = true)]
async fn test_output_after_match_is_still_mirrored() {
    let transcript = SharedBuffer::default();
    let stub = StubConsole::new()
        .emit_after(Duration::from_secs(1), "root@OpenWrt:/# ")
        .emit_after(Duration::from_secs(2), "udhcpc: lease obtained\r\n");
    let mut console = Console::new(stub, Transcript::from_writer(transcript.clone()));

    let prompt = Pattern::regex(r"root@.*:/#").unwrap();
    console.expect(&prompt, Duration::from_secs(5)).await.unwrap();
    console.idle(Duration::from_secs(5)).await.unwrap();

    assert_eq!(transcript.text(), "root@OpenWrt:/# udhcpc: lease obtained\r\n");
}

#[tokio::test(start_paused = true)]
async fn test_status_lines_interleave_with_output() {
    let transcript = SharedBuffer::default();
    let stub = StubConsole::new().emit_after(Duration::ZERO, "booting\r\n");
    let mut console = Console::new(stub, Transcript::from_writer(transcript.clone()));

    console.announce("Waiting for boot...").unwrap();
    console.pump().await.unwrap();
    console.announce("✓ Boot complete!").unwrap();

    assert_eq!(
        transcript.text(),
        "Waiting for boot...\nbooting\r\n✓ Boot complete!\n"
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_dialogue_over_real_pty() {
    let script = concat!(
        "printf 'booting\\n'; ",
        "printf 'Please press Enter to activate this console.\\n'; ",
        "read wake; ",
        "printf 'root@OpenWrt:/# '; ",
        "read cmd; ",
        "printf 'ran %s\\nroot@OpenWrt:/# ' \"$cmd\"; ",
        "sleep 30"
    );
    let args = vec!["-c".to_string(), script.to_string()];
    let Ok((mut process, streams)) = spawn_pty_process("/bin/sh", &args, &SpawnConfig::default())
    else {
        // No PTY support in this environment
        return;
    };
    let mut console = Console::new(streams, Transcript::sink());

    let marker = Pattern::literal(BOOT_MARKER);
    let prompt = Pattern::regex(r"root@.*:/#").unwrap();
    let timeout = Duration::from_secs(10);

    console.expect(&marker, timeout).await.unwrap();
    console.send_line("").await.unwrap();
    console.expect(&prompt, timeout).await.unwrap();

    console.send_line("uci commit network").await.unwrap();
    console
        .expect(&Pattern::literal("ran uci commit network"), timeout)
        .await
        .unwrap();
    console.expect(&prompt, timeout).await.unwrap();

    process.terminate().await.unwrap();
    assert!(process.has_exited());
}
