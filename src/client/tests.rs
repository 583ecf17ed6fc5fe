//! Full-stack tests: a real Directory, a real Node, and the client session
//! machines, all over loopback sockets.

use std::sync::Arc;

use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};

use crate::directory::service::{self as directory_service, DirectoryState};
use crate::node::persistence::NodeStorage;
use crate::node::service::{self as node_service, NodeState};
use crate::protocol::frames::MsgType;
use crate::protocol::status;

use super::session::{DirectorySession, NodeSession};

struct Stack {
    directory: String,
    _node_state: Arc<NodeState>,
    _dir_state: Arc<DirectoryState>,
    _scratch: TempDir,
}

async fn spawn_stack() -> Stack {
    let dir_state = DirectoryState::new(false);
    let dir_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let directory = format!("127.0.0.1:{}", dir_listener.local_addr().unwrap().port());
    {
        let state = dir_state.clone();
        tokio::spawn(async move {
            let _ = directory_service::serve(dir_listener, state).await;
        });
    }

    let scratch = tempfile::tempdir().unwrap();
    let storage = NodeStorage::open(scratch.path().join("ss_test")).unwrap();
    let node_state = Arc::new(NodeState::new(storage));

    let node_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let node_port = node_listener.local_addr().unwrap().port();
    {
        let state = node_state.clone();
        tokio::spawn(async move {
            let _ = node_service::serve_clients(node_listener, state).await;
        });
    }

    let mut control = TcpStream::connect(&directory).await.unwrap();
    node_service::register_with_directory(&mut control, &node_state, "127.0.0.1", node_port as i32)
        .await
        .unwrap();
    {
        let state = node_state.clone();
        tokio::spawn(async move {
            let _ = node_service::control_loop(control, state).await;
        });
    }

    Stack {
        directory,
        _node_state: node_state,
        _dir_state: dir_state,
        _scratch: scratch,
    }
}

async fn read_via_redirect(session: &mut DirectorySession, file: &str) -> anyhow::Result<String> {
    let addr = session.redirect(MsgType::Read, file).await?;
    let mut node = NodeSession::connect(&addr, &session.username).await?;
    let header = node.command(&format!("READ {file}")).await?;
    let body = if header.starts_with("OK_200 FILE_CONTENT") {
        node.read_until(status::END_OF_FILE).await?
    } else if header.starts_with("OK_200 EMPTY_FILE") {
        String::new()
    } else {
        anyhow::bail!("{header}");
    };
    node.exit().await;
    Ok(body.trim_end().to_string())
}

async fn write_sentence(
    session: &mut DirectorySession,
    file: &str,
    sentence: usize,
    edit: &str,
) -> anyhow::Result<()> {
    let addr = session.redirect(MsgType::Write, file).await?;
    let mut node = NodeSession::connect(&addr, &session.username).await?;
    let reply = node.command(&format!("WRITE {file} {sentence}")).await?;
    anyhow::ensure!(reply.starts_with("OK_200"), "{reply}");
    let reply = node.command(edit).await?;
    anyhow::ensure!(reply.starts_with("OK_200"), "{reply}");
    let reply = node.command("ETIRW").await?;
    anyhow::ensure!(reply == "OK_200 WRITE COMPLETED", "{reply}");
    node.exit().await;
    Ok(())
}

#[tokio::test]
async fn create_write_read_delete_lifecycle() {
    let stack = spawn_stack().await;
    let mut alice = DirectorySession::connect(&stack.directory, "alice")
        .await
        .unwrap();

    alice
        .expect_ack(MsgType::Create, "a.txt", Vec::new())
        .await
        .unwrap();

    write_sentence(&mut alice, "a.txt", 1, "1 hello world.")
        .await
        .unwrap();
    assert_eq!(read_via_redirect(&mut alice, "a.txt").await.unwrap(), "hello world.");

    // The Directory refreshes statistics from the Node for INFO.
    let info = alice.fetch_info("a.txt").await.unwrap();
    assert_eq!(info.owner, "alice");
    assert_eq!(info.word_count, 2);

    alice
        .expect_ack(MsgType::Delete, "a.txt", Vec::new())
        .await
        .unwrap();
    let err = read_via_redirect(&mut alice, "a.txt").await.unwrap_err();
    assert!(err.to_string().contains("not found"), "got: {err}");
}

#[tokio::test]
async fn undo_through_the_directory_restores_prior_state() {
    let stack = spawn_stack().await;
    let mut alice = DirectorySession::connect(&stack.directory, "alice")
        .await
        .unwrap();

    alice
        .expect_ack(MsgType::Create, "story.txt", Vec::new())
        .await
        .unwrap();
    write_sentence(&mut alice, "story.txt", 1, "1 first draft.")
        .await
        .unwrap();
    write_sentence(&mut alice, "story.txt", 2, "1 second thought.")
        .await
        .unwrap();
    assert_eq!(
        read_via_redirect(&mut alice, "story.txt").await.unwrap(),
        "first draft. second thought."
    );

    alice
        .expect_ack(MsgType::Undo, "story.txt", Vec::new())
        .await
        .unwrap();
    assert_eq!(
        read_via_redirect(&mut alice, "story.txt").await.unwrap(),
        "first draft."
    );

    alice
        .expect_ack(MsgType::Undo, "story.txt", Vec::new())
        .await
        .unwrap();
    assert_eq!(read_via_redirect(&mut alice, "story.txt").await.unwrap(), "");

    // History is exhausted.
    let err = alice
        .expect_ack(MsgType::Undo, "story.txt", Vec::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("No undo history"), "got: {err}");
}

#[tokio::test]
async fn checkpoint_revert_roundtrip() {
    let stack = spawn_stack().await;
    let mut alice = DirectorySession::connect(&stack.directory, "alice")
        .await
        .unwrap();

    alice
        .expect_ack(MsgType::Create, "doc.txt", Vec::new())
        .await
        .unwrap();
    write_sentence(&mut alice, "doc.txt", 1, "1 version one.")
        .await
        .unwrap();

    let addr = alice.redirect(MsgType::Checkpoint, "doc.txt").await.unwrap();
    let mut node = NodeSession::connect(&addr, "alice").await.unwrap();
    assert_eq!(
        node.command("CHECKPOINT doc.txt v1").await.unwrap(),
        "OK_200 CHECKPOINT CREATED"
    );
    node.exit().await;

    write_sentence(&mut alice, "doc.txt", 2, "1 version two.")
        .await
        .unwrap();

    let addr = alice.redirect(MsgType::Revert, "doc.txt").await.unwrap();
    let mut node = NodeSession::connect(&addr, "alice").await.unwrap();
    assert_eq!(
        node.command("REVERT doc.txt v1").await.unwrap(),
        "OK_200 REVERT COMPLETED"
    );
    node.exit().await;
    assert_eq!(
        read_via_redirect(&mut alice, "doc.txt").await.unwrap(),
        "version one."
    );

    // The revert itself is undoable.
    alice
        .expect_ack(MsgType::Undo, "doc.txt", Vec::new())
        .await
        .unwrap();
    assert_eq!(
        read_via_redirect(&mut alice, "doc.txt").await.unwrap(),
        "version one. version two."
    );
}

#[tokio::test]
async fn access_request_flow_across_both_links() {
    let stack = spawn_stack().await;
    let mut alice = DirectorySession::connect(&stack.directory, "alice")
        .await
        .unwrap();
    alice
        .expect_ack(MsgType::Create, "shared.txt", Vec::new())
        .await
        .unwrap();
    write_sentence(&mut alice, "shared.txt", 1, "1 team notes.")
        .await
        .unwrap();

    // bob cannot read, but can locate the file to lodge a request.
    let mut bob = DirectorySession::connect(&stack.directory, "bob").await.unwrap();
    assert!(bob.redirect(MsgType::Read, "shared.txt").await.is_err());
    let addr = bob.locate("shared.txt").await.unwrap();

    let mut bob_node = NodeSession::connect(&addr, "bob").await.unwrap();
    assert_eq!(
        bob_node.command("REQUESTACCESS shared.txt -W").await.unwrap(),
        "OK_200 ACCESS REQUEST SUBMITTED"
    );
    bob_node.exit().await;

    let mut alice_node = NodeSession::connect(&addr, "alice").await.unwrap();
    let reply = alice_node.command("VIEWREQUESTS shared.txt").await.unwrap();
    assert_eq!(reply, "OK_200 ACCESS_REQUESTS");
    let listing = alice_node.read_until(status::END_OF_REQUESTS).await.unwrap();
    assert!(listing.contains("User: bob"));
    assert_eq!(
        alice_node
            .command("APPROVEREQUEST shared.txt bob -W")
            .await
            .unwrap(),
        "OK_200 ACCESS REQUEST APPROVED"
    );
    alice_node.exit().await;

    // The grant is live on the Node: bob can now open a write session.
    let mut bob_node = NodeSession::connect(&addr, "bob").await.unwrap();
    assert_eq!(
        bob_node.command("WRITE shared.txt 2").await.unwrap(),
        "OK_200 WRITE MODE ENABLED"
    );
    assert_eq!(bob_node.command("ETIRW").await.unwrap(), "OK_200 WRITE COMPLETED");
    bob_node.exit().await;
}
