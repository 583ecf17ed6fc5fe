use std::sync::Arc;

use tempfile::TempDir;
use tokio::net::TcpListener;

use crate::client::session::NodeSession;
use crate::protocol::types::{NodeAddr, Permission};

use super::checkpoints;
use super::history;
use super::locks::{LockOutcome, LockTable};
use super::persistence::NodeStorage;
use super::requests;
use super::sentences::{merge_commit, splice_words, split_sentences, tokenize, writable_slots};
use super::service::{self, NodeState};

// ============================================================
// SENTENCE ENGINE
// ============================================================

#[test]
fn sentences_split_on_terminal_delimiters() {
    let words = tokenize("one. two! three?");
    let sentences = split_sentences(&words);
    assert_eq!(sentences.len(), 3);
    assert!(sentences.iter().all(|s| s.terminated));
    assert_eq!((sentences[1].start, sentences[1].end), (1, 1));
}

#[test]
fn trailing_fragment_forms_a_sentence() {
    let words = tokenize("done. still going");
    let sentences = split_sentences(&words);
    assert_eq!(sentences.len(), 2);
    assert!(!sentences[1].terminated);
    assert_eq!((sentences[1].start, sentences[1].end), (1, 2));
}

#[test]
fn delimiter_mid_word_does_not_split() {
    // Only the final character of a word can terminate a sentence.
    let words = tokenize("v1.2 is out. next");
    let sentences = split_sentences(&words);
    assert_eq!(sentences.len(), 2);
    assert_eq!((sentences[0].start, sentences[0].end), (0, 2));
    assert!(!sentences[1].terminated);
}

#[test]
fn writable_slots_follow_the_last_sentence() {
    assert_eq!(writable_slots(""), 1);
    assert_eq!(writable_slots("   "), 1);
    assert_eq!(writable_slots("no delimiter yet"), 1);
    assert_eq!(writable_slots("first."), 2);
    assert_eq!(writable_slots("first. second"), 2);
    assert_eq!(writable_slots("first. second!"), 3);
}

#[test]
fn splice_inserts_at_front_of_sentence() {
    let out = splice_words("hello world.", 1, 1, "ZERO").unwrap();
    assert_eq!(out, "ZERO hello world.");
}

#[test]
fn splice_keeps_delimiter_on_new_last_word() {
    let out = splice_words("hello world.", 1, 3, "again").unwrap();
    assert_eq!(out, "hello world again.");
}

#[test]
fn splice_handles_bare_delimiter_word() {
    // "." alone carries the delimiter; after splitting it off the sentence
    // has one word and the delimiter reattaches to the inserted tail.
    let out = splice_words("hi .", 1, 2, "there").unwrap();
    assert_eq!(out, "hi there.");
}

#[test]
fn splice_into_middle_sentence_only_touches_it() {
    let out = splice_words("one. two. three.", 2, 1, "TWO-PRIME").unwrap();
    assert_eq!(out, "one. TWO-PRIME two. three.");
}

#[test]
fn splice_word_index_out_of_range() {
    let err = splice_words("hello world.", 1, 4, "nope").unwrap_err();
    assert_eq!(err.text_code(), "ERR_404");
}

#[test]
fn splice_empty_file_takes_only_index_one() {
    assert_eq!(splice_words("", 1, 1, "first words.").unwrap(), "first words.");
    let err = splice_words("", 1, 2, "nope").unwrap_err();
    assert_eq!(err.text_code(), "ERR_404");
}

#[test]
fn splice_new_sentence_appends() {
    let out = splice_words("first.", 2, 1, "second.").unwrap();
    assert_eq!(out, "first. second.");
    let err = splice_words("first.", 2, 2, "nope").unwrap_err();
    assert_eq!(err.text_code(), "ERR_404");
}

#[test]
fn splice_normalises_whitespace_runs() {
    let out = splice_words("a  lot\tof   space.", 1, 1, "X").unwrap();
    assert_eq!(out, "X a lot of space.");
}

#[test]
fn merge_replaces_only_the_target_sentence() {
    let merged = merge_commit("one. two. three.", "one. EDITED two. three.", 2);
    assert_eq!(merged, "one. EDITED two. three.");
}

#[test]
fn merge_composes_with_concurrent_commits() {
    // alice committed "ZERO one. ..." while bob's swap still reflects the
    // original file; bob's commit of sentence 3 must keep alice's edit.
    let live = "ZERO one. two. three.";
    let bob_swap = "one. two. FINAL three.";
    assert_eq!(merge_commit(live, bob_swap, 3), "ZERO one. two. FINAL three.");
}

#[test]
fn merge_appends_past_the_live_end() {
    let merged = merge_commit("first.", "first. second.", 2);
    assert_eq!(merged, "first. second.");
}

#[test]
fn merge_into_empty_live_takes_the_swap() {
    assert_eq!(merge_commit("", "fresh text.", 1), "fresh text.");
}

// ============================================================
// LOCK TABLE
// ============================================================

#[test]
fn lock_is_exclusive_per_sentence() {
    let locks = LockTable::new();
    assert_eq!(locks.try_lock("f", 1, 10), LockOutcome::Acquired);
    assert_eq!(locks.try_lock("f", 1, 11), LockOutcome::Conflict);
    assert_eq!(locks.try_lock("f", 1, 10), LockOutcome::AlreadyHeld);
    // Distinct sentences and files are independent.
    assert_eq!(locks.try_lock("f", 2, 11), LockOutcome::Acquired);
    assert_eq!(locks.try_lock("g", 1, 11), LockOutcome::Acquired);
}

#[test]
fn unlock_frees_the_sentence() {
    let locks = LockTable::new();
    locks.try_lock("f", 1, 10);
    locks.unlock("f", 1, 10);
    assert_eq!(locks.try_lock("f", 1, 11), LockOutcome::Acquired);
}

#[test]
fn release_session_drops_every_lock_it_held() {
    let locks = LockTable::new();
    locks.try_lock("f", 1, 10);
    locks.try_lock("f", 2, 10);
    locks.try_lock("g", 5, 10);
    locks.try_lock("g", 6, 11);
    assert_eq!(locks.release_session(10), 3);
    assert_eq!(locks.len(), 1);
    assert!(!locks.file_locked("f"));
    assert!(locks.file_locked("g"));
}

// ============================================================
// PERSISTENCE
// ============================================================

fn scratch_store() -> (TempDir, NodeStorage) {
    let dir = tempfile::tempdir().unwrap();
    let store = NodeStorage::open(dir.path().join("ss_9001")).unwrap();
    (dir, store)
}

#[test]
fn create_read_delete_roundtrip() {
    let (_dir, store) = scratch_store();
    store.create_file("a.txt", "alice").unwrap();
    assert!(store.exists("a.txt"));
    assert_eq!(store.read_file("a.txt").unwrap(), "");

    store.replace_file("a.txt", "hello world.").unwrap();
    assert_eq!(store.read_file("a.txt").unwrap(), "hello world.");
    let stats = store.stats_of("a.txt").unwrap();
    assert_eq!(stats.word_count, 2);
    assert_eq!(stats.char_count, 12);

    store.delete_file("a.txt").unwrap();
    assert!(!store.exists("a.txt"));
    assert_eq!(store.read_file("a.txt").unwrap_err().text_code(), "ERR_404");
}

#[test]
fn duplicate_create_is_a_conflict() {
    let (_dir, store) = scratch_store();
    store.create_file("a.txt", "alice").unwrap();
    let err = store.create_file("a.txt", "bob").unwrap_err();
    assert_eq!(err.text_code(), "ERR_409");
}

#[test]
fn metadata_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("ss_9001");
    {
        let store = NodeStorage::open(&base).unwrap();
        store.create_file("a.txt", "alice").unwrap();
        store.replace_file("a.txt", "one two three.").unwrap();
        store.set_folder("a.txt", "projects");
        store.set_acl("a.txt", "bob", Permission::Write);
        store.touch_access("a.txt", "bob");
    }
    let reopened = NodeStorage::open(&base).unwrap();
    let meta = reopened.files.get("a.txt").unwrap().clone();
    assert_eq!(meta.owner, "alice");
    assert_eq!(meta.folder, "projects");
    assert_eq!(meta.word_count, 3);
    assert_eq!(meta.last_accessed_by, "bob");
    assert_eq!(meta.acl.len(), 1);
    assert_eq!(meta.acl[0].identity, "bob");
    assert_eq!(meta.acl[0].permission, Permission::Write);
}

#[test]
fn permission_checks_respect_owner_and_acl() {
    let (_dir, store) = scratch_store();
    store.create_file("a.txt", "alice").unwrap();
    store.set_acl("a.txt", "bob", Permission::Read);

    assert!(store.check_permission("a.txt", "alice", Permission::Write));
    assert!(store.check_permission("a.txt", "bob", Permission::Read));
    assert!(!store.check_permission("a.txt", "bob", Permission::Write));
    assert!(!store.check_permission("a.txt", "carol", Permission::Read));

    // Write implies read.
    store.set_acl("a.txt", "bob", Permission::Write);
    assert!(store.check_permission("a.txt", "bob", Permission::Read));
}

#[test]
fn orphan_swaps_are_cleaned_on_open() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("ss_9001");
    {
        let store = NodeStorage::open(&base).unwrap();
        store.create_file("a.txt", "alice").unwrap();
        std::fs::write(store.files_dir().join("a.txt_1_42.swap"), "leftover").unwrap();
        std::fs::write(store.files_dir().join("not_a_swap.txt"), "keep").unwrap();
    }
    let reopened = NodeStorage::open(&base).unwrap();
    assert!(!reopened.files_dir().join("a.txt_1_42.swap").exists());
    assert!(reopened.files_dir().join("not_a_swap.txt").exists());
    assert!(reopened.files_dir().join("a.txt").exists());
}

// ============================================================
// UNDO HISTORY
// ============================================================

#[test]
fn undo_chain_walks_back_to_empty() {
    let (_dir, store) = scratch_store();
    store.create_file("f.txt", "alice").unwrap();

    for content in ["S1", "S2", "S3"] {
        history::create_backup(&store, "f.txt", "alice").unwrap();
        store.replace_file("f.txt", content).unwrap();
    }

    history::perform_undo(&store, "f.txt").unwrap();
    assert_eq!(store.read_file("f.txt").unwrap(), "S2");
    history::perform_undo(&store, "f.txt").unwrap();
    assert_eq!(store.read_file("f.txt").unwrap(), "S1");
    history::perform_undo(&store, "f.txt").unwrap();
    assert_eq!(store.read_file("f.txt").unwrap(), "");

    let err = history::perform_undo(&store, "f.txt").unwrap_err();
    assert_eq!(err.text_code(), "ERR_404");
    assert_eq!(history::remaining_undos(&store, "f.txt"), 0);
}

#[test]
fn exhausted_entries_are_kept_not_deleted() {
    let (_dir, store) = scratch_store();
    store.create_file("f.txt", "alice").unwrap();
    history::create_backup(&store, "f.txt", "alice").unwrap();
    store.replace_file("f.txt", "S1").unwrap();

    history::perform_undo(&store, "f.txt").unwrap();
    let journal =
        std::fs::read_to_string(store.undo_dir().join("f.txt.undo")).unwrap();
    assert_eq!(journal.lines().count(), 1);
    assert!(journal.trim_end().ends_with("|1"));
}

#[test]
fn legacy_three_field_journal_lines_are_unused() {
    let (_dir, store) = scratch_store();
    store.create_file("f.txt", "alice").unwrap();
    store.replace_file("f.txt", "current").unwrap();
    std::fs::write(store.versions_dir().join("f.txt_100.bak"), "older").unwrap();
    std::fs::write(
        store.undo_dir().join("f.txt.undo"),
        "100|f.txt_100.bak|alice\n",
    )
    .unwrap();

    history::perform_undo(&store, "f.txt").unwrap();
    assert_eq!(store.read_file("f.txt").unwrap(), "older");
}

// ============================================================
// CHECKPOINTS
// ============================================================

#[test]
fn checkpoint_create_view_and_duplicate_tag() {
    let (_dir, store) = scratch_store();
    store.create_file("f.txt", "alice").unwrap();
    store.replace_file("f.txt", "state one.").unwrap();

    checkpoints::create(&store, "f.txt", "v1", "alice").unwrap();
    assert_eq!(checkpoints::view(&store, "f.txt", "v1").unwrap(), "state one.");

    let err = checkpoints::create(&store, "f.txt", "v1", "alice").unwrap_err();
    assert_eq!(err.text_code(), "ERR_409");

    let err = checkpoints::view(&store, "f.txt", "v2").unwrap_err();
    assert_eq!(err.text_code(), "ERR_404");

    let listing = checkpoints::list(&store, "f.txt");
    assert!(listing.contains("Tag: v1"));
    assert!(listing.contains("Total checkpoints: 1"));
}

#[test]
fn revert_records_an_undo_step() {
    let (_dir, store) = scratch_store();
    store.create_file("f.txt", "alice").unwrap();
    store.replace_file("f.txt", "S1").unwrap();
    checkpoints::create(&store, "f.txt", "v1", "alice").unwrap();

    history::create_backup(&store, "f.txt", "alice").unwrap();
    store.replace_file("f.txt", "S2").unwrap();

    checkpoints::revert(&store, "f.txt", "v1", "alice").unwrap();
    assert_eq!(store.read_file("f.txt").unwrap(), "S1");

    // The revert backed up S2 first, so one undo returns to it.
    history::perform_undo(&store, "f.txt").unwrap();
    assert_eq!(store.read_file("f.txt").unwrap(), "S2");
}

// ============================================================
// ACCESS REQUESTS
// ============================================================

#[test]
fn request_lifecycle_approve() {
    let (_dir, store) = scratch_store();
    store.create_file("f.txt", "alice").unwrap();

    requests::submit(&store, "f.txt", "bob", "-W").unwrap();
    let err = requests::submit(&store, "f.txt", "bob", "-W").unwrap_err();
    assert_eq!(err.text_code(), "ERR_409");

    let listing = requests::list_for_file(&store, "f.txt");
    assert!(listing.contains("User: bob"));

    requests::approve(&store, "f.txt", "bob", "-W").unwrap();
    assert!(store.check_permission("f.txt", "bob", Permission::Write));
    assert!(requests::already_granted(&store, "f.txt", "bob", "-R"));

    // The pending entry was consumed.
    let err = requests::approve(&store, "f.txt", "bob", "-W").unwrap_err();
    assert_eq!(err.text_code(), "ERR_404");
}

#[test]
fn request_lifecycle_deny_leaves_acl_alone() {
    let (_dir, store) = scratch_store();
    store.create_file("f.txt", "alice").unwrap();

    requests::submit(&store, "f.txt", "bob", "-R").unwrap();
    requests::deny(&store, "f.txt", "bob").unwrap();
    assert!(!store.check_permission("f.txt", "bob", Permission::Read));

    // A denied request no longer shows as pending and may be re-submitted.
    let listing = requests::list_for_owner(&store, "alice");
    assert!(listing.contains("No pending access requests"));
    requests::submit(&store, "f.txt", "bob", "-R").unwrap();
}

// ============================================================
// DIRECT-CLIENT PROTOCOL (end to end over loopback)
// ============================================================

async fn spawn_node() -> (Arc<NodeState>, NodeAddr, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = NodeStorage::open(dir.path().join("ss_test")).unwrap();
    let state = Arc::new(NodeState::new(store));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let serving = state.clone();
    tokio::spawn(async move {
        let _ = service::serve_clients(listener, serving).await;
    });
    let addr = NodeAddr {
        ip: "127.0.0.1".to_string(),
        port: port as i32,
    };
    (state, addr, dir)
}

#[tokio::test]
async fn write_session_commits_and_reads_back() {
    let (state, addr, _dir) = spawn_node().await;
    state.store.create_file("a.txt", "alice").unwrap();

    let mut alice = NodeSession::connect(&addr, "alice").await.unwrap();
    let reply = alice.command("WRITE a.txt 1").await.unwrap();
    assert_eq!(reply, "OK_200 WRITE MODE ENABLED");

    let reply = alice.command("1 hello world.").await.unwrap();
    assert_eq!(reply, "OK_200 CONTENT INSERTED");
    let reply = alice.command("ETIRW").await.unwrap();
    assert_eq!(reply, "OK_200 WRITE COMPLETED");

    let reply = alice.command("READ a.txt").await.unwrap();
    assert_eq!(reply, "OK_200 FILE_CONTENT");
    let body = alice.read_until("END_OF_FILE").await.unwrap();
    assert_eq!(body.trim(), "hello world.");
    alice.exit().await;

    assert_eq!(state.store.read_file("a.txt").unwrap(), "hello world.");
    let meta = state.store.files.get("a.txt").unwrap().clone();
    assert_eq!(meta.last_accessed_by, "alice");
}

#[tokio::test]
async fn second_writer_gets_a_conflict() {
    let (state, addr, _dir) = spawn_node().await;
    state.store.create_file("f.txt", "alice").unwrap();
    state.store.replace_file("f.txt", "one. two.").unwrap();
    state.store.set_acl("f.txt", "bob", Permission::Write);

    let mut alice = NodeSession::connect(&addr, "alice").await.unwrap();
    let mut bob = NodeSession::connect(&addr, "bob").await.unwrap();

    assert_eq!(
        alice.command("WRITE f.txt 2").await.unwrap(),
        "OK_200 WRITE MODE ENABLED"
    );
    let reply = bob.command("WRITE f.txt 2").await.unwrap();
    assert!(reply.starts_with("ERR_409"), "got: {reply}");

    alice.exit().await;
    bob.exit().await;
}

#[tokio::test]
async fn disconnect_releases_the_lock() {
    let (state, addr, _dir) = spawn_node().await;
    state.store.create_file("f.txt", "alice").unwrap();
    state.store.replace_file("f.txt", "one.").unwrap();

    let mut alice = NodeSession::connect(&addr, "alice").await.unwrap();
    assert_eq!(
        alice.command("WRITE f.txt 1").await.unwrap(),
        "OK_200 WRITE MODE ENABLED"
    );
    drop(alice);

    // The worker notices the disconnect and frees the lock.
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
    while state.locks.file_locked("f.txt") {
        assert!(std::time::Instant::now() < deadline, "lock was never released");
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn concurrent_sentence_edits_both_survive() {
    let (state, addr, _dir) = spawn_node().await;
    state.store.create_file("f.txt", "alice").unwrap();
    state.store.replace_file("f.txt", "one. two. three.").unwrap();
    state.store.set_acl("f.txt", "bob", Permission::Write);

    let mut alice = NodeSession::connect(&addr, "alice").await.unwrap();
    let mut bob = NodeSession::connect(&addr, "bob").await.unwrap();

    assert_eq!(
        alice.command("WRITE f.txt 1").await.unwrap(),
        "OK_200 WRITE MODE ENABLED"
    );
    assert_eq!(
        bob.command("WRITE f.txt 3").await.unwrap(),
        "OK_200 WRITE MODE ENABLED"
    );

    assert_eq!(alice.command("1 ZERO").await.unwrap(), "OK_200 CONTENT INSERTED");
    assert_eq!(bob.command("1 FINAL").await.unwrap(), "OK_200 CONTENT INSERTED");

    assert_eq!(alice.command("ETIRW").await.unwrap(), "OK_200 WRITE COMPLETED");
    assert_eq!(bob.command("ETIRW").await.unwrap(), "OK_200 WRITE COMPLETED");

    assert_eq!(
        state.store.read_file("f.txt").unwrap(),
        "ZERO one. two. FINAL three."
    );
    alice.exit().await;
    bob.exit().await;
}

#[tokio::test]
async fn stream_emits_words_in_order_with_quiet_time() {
    let (state, addr, _dir) = spawn_node().await;
    state.store.create_file("s.txt", "alice").unwrap();
    state.store.replace_file("s.txt", "alpha beta gamma.").unwrap();

    let mut alice = NodeSession::connect(&addr, "alice").await.unwrap();
    let started = std::time::Instant::now();
    assert_eq!(
        alice.command("STREAM s.txt").await.unwrap(),
        "OK_200 STREAM_START"
    );

    let mut words = Vec::new();
    loop {
        let line = alice.read_line().await.unwrap();
        if line.trim() == "STREAM_COMPLETE" {
            break;
        }
        words.push(line.trim().to_string());
    }
    assert_eq!(words, vec!["alpha", "beta", "gamma."]);
    // Three words with >= 100 ms of quiet time after each.
    assert!(started.elapsed() >= std::time::Duration::from_millis(250));
    alice.exit().await;
}

#[tokio::test]
async fn undo_without_history_reports_not_found() {
    let (state, addr, _dir) = spawn_node().await;
    state.store.create_file("f.txt", "alice").unwrap();

    let mut alice = NodeSession::connect(&addr, "alice").await.unwrap();
    let reply = alice.command("UNDO f.txt").await.unwrap();
    assert!(reply.starts_with("ERR_404"), "got: {reply}");
    alice.exit().await;
}

#[tokio::test]
async fn write_denied_without_permission() {
    let (state, addr, _dir) = spawn_node().await;
    state.store.create_file("f.txt", "alice").unwrap();
    state.store.replace_file("f.txt", "one.").unwrap();
    state.store.set_acl("f.txt", "bob", Permission::Read);

    let mut bob = NodeSession::connect(&addr, "bob").await.unwrap();
    let reply = bob.command("WRITE f.txt 1").await.unwrap();
    assert!(reply.starts_with("ERR_403"), "got: {reply}");
    bob.exit().await;
}
