//! End-to-end tests driving real child processes through a pipe set.
#![cfg(unix)]

use std::collections::BTreeMap;
use std::process::{Child, Command};
use std::thread;
use std::time::{Duration, Instant};

use procpipe_core::{
    Channel, InputChunk, InputSource, InputStream, LiveInput, PipeSet, PipesConfig, StrategyKind,
    TempFilePipes, open_pipes,
};

fn fast() -> PipesConfig {
    PipesConfig {
        poll_interval_ms: 20,
        ..PipesConfig::default()
    }
}

fn spawn(pipes: &mut dyn PipeSet, program: &str, args: &[&str]) -> Child {
    let mut command = Command::new(program);
    command.args(args);
    pipes.take_child_stdio().unwrap().apply(&mut command);
    let child = command.spawn().unwrap();
    drop(command);
    pipes.unblock().unwrap();
    child
}

/// Minimal supervisor loop; returns everything read per channel.
fn pump(pipes: &mut dyn PipeSet, child: &mut Child) -> BTreeMap<Channel, Vec<u8>> {
    let deadline = Instant::now() + Duration::from_secs(20);
    let mut collected: BTreeMap<Channel, Vec<u8>> = BTreeMap::new();
    let mut exited = false;
    while pipes.is_open() {
        assert!(Instant::now() < deadline, "child did not finish");
        let pending = pipes.write(false).unwrap();
        let waiting = pending.is_some_and(|c| c.contains(&Channel::Stdin));
        for (channel, data) in pipes.read(!exited && !waiting, exited).unwrap() {
            collected.entry(channel).or_default().extend(data);
        }
        if !exited {
            exited = child.try_wait().unwrap().is_some();
        }
    }
    pipes.close();
    child.wait().unwrap();
    collected
}

fn stdout_of(collected: &BTreeMap<Channel, Vec<u8>>) -> &[u8] {
    collected.get(&Channel::Stdout).map_or(&[], Vec::as_slice)
}

#[test]
fn fixed_input_round_trips_through_cat() {
    let data: Vec<u8> = (0..200_000_u32).map(|i| (i % 251) as u8).collect();
    let mut pipes = open_pipes(&fast(), InputSource::Fixed(data.clone())).unwrap();
    let mut child = spawn(pipes.as_mut(), "cat", &[]);
    let collected = pump(pipes.as_mut(), &mut child);
    assert_eq!(stdout_of(&collected), &data[..]);
}

#[test]
fn sequence_is_delivered_in_order() {
    let items = vec![
        InputChunk::from("ab"),
        InputChunk::from(InputStream::from_bytes("cd")),
        InputChunk::from("ef"),
    ];
    let mut pipes = open_pipes(&fast(), InputSource::sequence(items)).unwrap();
    let mut child = spawn(pipes.as_mut(), "cat", &[]);
    let collected = pump(pipes.as_mut(), &mut child);
    assert_eq!(stdout_of(&collected), b"abcdef");
}

#[test]
fn file_stream_is_forwarded() {
    let mut file = tempfile::tempfile().unwrap();
    std::io::Write::write_all(&mut file, b"file contents\n").unwrap();
    std::io::Seek::rewind(&mut file).unwrap();
    let input = InputSource::Stream(InputStream::from_file(file));
    let mut pipes = open_pipes(&fast(), input).unwrap();
    let mut child = spawn(pipes.as_mut(), "cat", &[]);
    let collected = pump(pipes.as_mut(), &mut child);
    assert_eq!(stdout_of(&collected), b"file contents\n");
}

#[test]
fn stderr_is_kept_separate() {
    let mut pipes = open_pipes(&fast(), InputSource::none()).unwrap();
    let mut child = spawn(pipes.as_mut(), "sh", &["-c", "printf out; printf err >&2"]);
    let collected = pump(pipes.as_mut(), &mut child);
    assert_eq!(stdout_of(&collected), b"out");
    assert_eq!(collected.get(&Channel::Stderr).map(Vec::as_slice), Some(&b"err"[..]));
}

#[test]
fn polling_read_returns_empty_without_closing() {
    let mut pipes = open_pipes(&fast(), InputSource::none()).unwrap();
    let mut child = spawn(pipes.as_mut(), "sleep", &["1"]);
    assert_eq!(pipes.write(false).unwrap(), None);
    let read = pipes.read(false, false).unwrap();
    assert!(read.is_empty());
    assert!(pipes.is_open());
    child.kill().unwrap();
    child.wait().unwrap();
    pipes.close();
}

#[test]
fn close_is_idempotent() {
    let mut pipes = open_pipes(&fast(), InputSource::fixed("never read")).unwrap();
    let mut child = spawn(pipes.as_mut(), "sleep", &["5"]);
    pipes.close();
    assert!(!pipes.is_open());
    pipes.close();
    assert!(!pipes.is_open());
    child.kill().unwrap();
    child.wait().unwrap();
}

#[test]
fn live_feed_delivers_while_running() {
    let (live, stream) = LiveInput::new();
    let mut pipes = open_pipes(&fast(), InputSource::Stream(stream)).unwrap();
    let mut child = spawn(pipes.as_mut(), "cat", &[]);

    let producer = thread::spawn(move || {
        for word in ["one ", "two ", "three"] {
            live.write(word).unwrap();
            thread::sleep(Duration::from_millis(30));
        }
        live.close();
    });

    let collected = pump(pipes.as_mut(), &mut child);
    producer.join().unwrap();
    assert_eq!(stdout_of(&collected), b"one two three");
}

#[test]
fn temp_file_offsets_only_move_forward() {
    let dir = tempfile::tempdir().unwrap();
    let config = PipesConfig {
        strategy: StrategyKind::TempFiles,
        temp_dir: Some(dir.path().to_path_buf()),
        ..fast()
    };
    let mut pipes = open_pipes(&config, InputSource::none()).unwrap();
    let mut child = spawn(pipes.as_mut(), "sh", &["-c", "printf first"]);
    child.wait().unwrap();

    let read = pipes.read(false, false).unwrap();
    assert_eq!(read.get(&Channel::Stdout).map(Vec::as_slice), Some(&b"first"[..]));
    let set = pipes.downcast_ref::<TempFilePipes>().unwrap();
    assert_eq!(set.consumed_offset(Channel::Stdout), Some(5));

    assert!(pipes.read(false, false).unwrap().is_empty());
    let set = pipes.downcast_ref::<TempFilePipes>().unwrap();
    assert_eq!(set.consumed_offset(Channel::Stdout), Some(5));

    while pipes.is_open() {
        pipes.write(false).unwrap();
        pipes.read(false, true).unwrap();
    }
    pipes.close();
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn temp_file_strategy_round_trips_large_output() {
    let dir = tempfile::tempdir().unwrap();
    let config = PipesConfig {
        strategy: StrategyKind::TempFiles,
        temp_dir: Some(dir.path().to_path_buf()),
        ..fast()
    };
    let data = vec![b'q'; 300_000];
    let mut pipes = open_pipes(&config, InputSource::Fixed(data.clone())).unwrap();
    let mut child = spawn(pipes.as_mut(), "cat", &[]);
    let collected = pump(pipes.as_mut(), &mut child);
    assert_eq!(stdout_of(&collected).len(), data.len());
}

#[test]
fn pty_child_sees_a_terminal() {
    if !procpipe_core::pty_supported() {
        return;
    }
    let config = PipesConfig { pty: true, ..fast() };
    let mut pipes = open_pipes(&config, InputSource::none()).unwrap();
    let mut child = spawn(pipes.as_mut(), "sh", &["-c", "test -t 1 && printf tty"]);
    let collected = pump(pipes.as_mut(), &mut child);
    assert_eq!(stdout_of(&collected), b"tty");
    assert!(!collected.contains_key(&Channel::Stderr));
}
