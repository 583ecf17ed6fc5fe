//! Direct-client worker: the line-based text protocol.
//!
//! One worker task runs per accepted Client connection. The session opens
//! with a `USER <identity>` handshake and then loops on verb-prefixed
//! commands until `EXIT` or disconnect. While a WRITE session is open the
//! worker interprets lines as `<word_index> <content>` edits or the `ETIRW`
//! commit. Every termination path releases the worker's sentence locks.

use std::fs;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::{Duration, sleep};

use crate::protocol::status::{self, StoreError};
use crate::protocol::types::Permission;

use super::checkpoints;
use super::history;
use super::locks::{LockOutcome, SessionId, next_session_id};
use super::requests;
use super::sentences;
use super::service::NodeState;

const STREAM_WORD_DELAY: Duration = Duration::from_millis(100);

struct WriteSession {
    file: String,
    sentence: usize,
}

async fn send_line(writer: &mut OwnedWriteHalf, line: &str) -> Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

async fn send_error(writer: &mut OwnedWriteHalf, err: &StoreError) -> Result<()> {
    send_line(writer, &err.text_line()).await
}

/// Entry point for one accepted direct-client connection.
pub async fn handle_client(stream: TcpStream, state: Arc<NodeState>) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let session = next_session_id();

    if let Err(e) = run_session(stream, &state, session, &peer).await {
        tracing::debug!("Client session {} ({}) ended: {}", session, peer, e);
    }
    let released = state.locks.release_session(session);
    if released > 0 {
        tracing::info!(
            "Released {} lock(s) held by disconnected session {}",
            released,
            session
        );
    }
}

async fn run_session(
    stream: TcpStream,
    state: &Arc<NodeState>,
    session: SessionId,
    peer: &str,
) -> Result<()> {
    let (read_half, mut writer) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    // Handshake: the first line must introduce the identity.
    let Some(first) = lines.next_line().await? else {
        return Ok(());
    };
    let username = match first.trim().strip_prefix("USER ") {
        Some(name) if !name.trim().is_empty() => name.trim().to_string(),
        _ => {
            send_line(&mut writer, "ERR_400 Expected USER <identity>").await?;
            return Ok(());
        }
    };
    send_line(&mut writer, "OK_200 USER_ACCEPTED").await?;
    tracing::info!("Direct connection from {} as '{}'", peer, username);

    let mut write_session: Option<WriteSession> = None;

    loop {
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        tracing::debug!("[{}] {}", username, line);

        if let Some(ws) = write_session.take() {
            if line == "ETIRW" {
                commit_write(state, &mut writer, &ws, session, &username).await?;
                state.locks.unlock(&ws.file, ws.sentence, session);
                continue;
            }
            apply_edit(state, &mut writer, &ws, session, &line).await?;
            write_session = Some(ws);
            continue;
        }

        let mut parts = line.splitn(2, char::is_whitespace);
        let cmd = parts.next().unwrap_or_default().to_uppercase();
        let rest = parts.next().unwrap_or("").trim();

        match cmd.as_str() {
            "READ" => handle_read(state, &mut writer, rest, &username).await?,
            "STREAM" => handle_stream(state, &mut writer, &mut lines, rest, &username).await?,
            "WRITE" => {
                write_session =
                    handle_write_open(state, &mut writer, rest, session, &username).await?;
            }
            "UNDO" => handle_undo(state, &mut writer, rest, &username).await?,
            "CREATE" => handle_create(state, &mut writer, rest, &username).await?,
            "DELETE" => handle_delete(state, &mut writer, rest).await?,
            "CHECKPOINT" => handle_checkpoint(state, &mut writer, rest, &username).await?,
            "VIEWCHECKPOINT" => handle_view_checkpoint(state, &mut writer, rest).await?,
            "REVERT" => handle_revert(state, &mut writer, rest, &username).await?,
            "LISTCHECKPOINTS" => handle_list_checkpoints(state, &mut writer, rest).await?,
            "REQUESTACCESS" => handle_request_access(state, &mut writer, rest, &username).await?,
            "VIEWREQUESTS" => handle_view_requests(state, &mut writer, rest, &username).await?,
            "APPROVEREQUEST" => handle_approve(state, &mut writer, rest, &username).await?,
            "DENYREQUEST" => handle_deny(state, &mut writer, rest, &username).await?,
            "EXIT" => {
                send_line(&mut writer, "OK_200 BYE").await?;
                break;
            }
            _ => send_line(&mut writer, "ERR_400 UNKNOWN_CMD").await?,
        }
    }
    Ok(())
}

// --- READ / STREAM ---

async fn handle_read(
    state: &NodeState,
    writer: &mut OwnedWriteHalf,
    file: &str,
    username: &str,
) -> Result<()> {
    if file.is_empty() {
        return send_line(writer, "ERR_400 Usage: READ <filename>").await;
    }
    match state.store.read_file(file) {
        Ok(content) if content.is_empty() => {
            send_line(writer, "OK_200 EMPTY_FILE").await?;
            state.store.touch_access(file, username);
        }
        Ok(content) => {
            send_line(writer, "OK_200 FILE_CONTENT").await?;
            writer.write_all(content.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            send_line(writer, status::END_OF_FILE).await?;
            state.store.touch_access(file, username);
        }
        Err(e) => send_error(writer, &e).await?,
    }
    Ok(())
}

async fn handle_stream(
    state: &NodeState,
    writer: &mut OwnedWriteHalf,
    lines: &mut Lines<BufReader<OwnedReadHalf>>,
    file: &str,
    username: &str,
) -> Result<()> {
    if file.is_empty() {
        return send_line(writer, "ERR_400 Usage: STREAM <filename>").await;
    }
    let content = match state.store.read_file(file) {
        Ok(content) => content,
        Err(e) => return send_error(writer, &e).await,
    };
    if content.trim().is_empty() {
        send_line(writer, "OK_200 EMPTY_FILE_STREAM").await?;
        state.store.touch_access(file, username);
        return Ok(());
    }

    send_line(writer, "OK_200 STREAM_START").await?;
    let words: Vec<String> = sentences::tokenize(&content)
        .into_iter()
        .map(|w| w.to_string())
        .collect();
    tracing::info!("Streaming {} words of '{}' to {}", words.len(), file, username);

    let mut completed = true;
    'stream: for word in &words {
        send_line(writer, word).await?;

        // Quiet time between words, interruptible by control input.
        tokio::select! {
            _ = sleep(STREAM_WORD_DELAY) => {}
            control = lines.next_line() => {
                let Some(control) = control? else {
                    completed = false;
                    break 'stream;
                };
                match control.trim() {
                    "STOP" => {
                        send_line(writer, status::STREAM_STOPPED).await?;
                        completed = false;
                        break 'stream;
                    }
                    "PAUSE" => {
                        send_line(writer, status::STREAM_PAUSED).await?;
                        // Block until the client resumes; anything else aborts.
                        let Some(resume) = lines.next_line().await? else {
                            completed = false;
                            break 'stream;
                        };
                        if resume.trim() == "RESUME" {
                            send_line(writer, status::STREAM_RESUMED).await?;
                        } else {
                            completed = false;
                            break 'stream;
                        }
                    }
                    _ => {}
                }
            }
        }
    }
    if completed {
        send_line(writer, status::STREAM_COMPLETE).await?;
    }
    state.store.touch_access(file, username);
    Ok(())
}

// --- WRITE session ---

async fn handle_write_open(
    state: &NodeState,
    writer: &mut OwnedWriteHalf,
    args: &str,
    session: SessionId,
    username: &str,
) -> Result<Option<WriteSession>> {
    let mut parts = args.split_whitespace();
    let (Some(file), Some(raw_sentence)) = (parts.next(), parts.next()) else {
        send_line(writer, "ERR_400 Usage: WRITE <filename> <sentence>").await?;
        return Ok(None);
    };
    let Ok(sentence) = raw_sentence.parse::<usize>() else {
        send_line(writer, "ERR_400 Sentence number must be a positive integer").await?;
        return Ok(None);
    };

    let content = match state.store.read_file(file) {
        Ok(content) => content,
        Err(e) => {
            send_error(writer, &e).await?;
            return Ok(None);
        }
    };
    if !state.store.check_permission(file, username, Permission::Write) {
        send_line(writer, "ERR_403 Access Denied (Write Permission Required)").await?;
        return Ok(None);
    }

    let writable = sentences::writable_slots(&content);
    if sentence < 1 || sentence > writable {
        send_line(
            writer,
            &format!("ERR_404 Sentence {sentence} not available. File allows sentences 1-{writable}."),
        )
        .await?;
        return Ok(None);
    }

    match state.locks.try_lock(file, sentence, session) {
        LockOutcome::Conflict => {
            send_line(
                writer,
                "ERR_409 This sentence is currently being edited by another user",
            )
            .await?;
            Ok(None)
        }
        LockOutcome::Acquired | LockOutcome::AlreadyHeld => {
            send_line(writer, "OK_200 WRITE MODE ENABLED").await?;
            tracing::info!(
                "WRITE lock on '{}' sentence {} by {} (session {})",
                file,
                sentence,
                username,
                session
            );
            Ok(Some(WriteSession {
                file: file.to_string(),
                sentence,
            }))
        }
    }
}

async fn apply_edit(
    state: &NodeState,
    writer: &mut OwnedWriteHalf,
    ws: &WriteSession,
    session: SessionId,
    line: &str,
) -> Result<()> {
    let mut parts = line.splitn(2, char::is_whitespace);
    let idx = parts.next().and_then(|t| t.parse::<usize>().ok());
    let content = parts.next().unwrap_or("").trim();
    let Some(idx) = idx else {
        return send_line(writer, "ERR_400 Invalid format. Use: <word_index> <content>").await;
    };
    if content.is_empty() {
        return send_line(writer, "ERR_400 Invalid format. Use: <word_index> <content>").await;
    }
    if idx < 1 {
        return send_line(writer, "ERR_400 Word index must be positive (1-based)").await;
    }

    let swap = state.store.swap_path(&ws.file, ws.sentence, session);
    let seed = if swap.exists() {
        fs::read_to_string(&swap).unwrap_or_default()
    } else {
        match state.store.read_file(&ws.file) {
            Ok(content) => content,
            Err(_) => {
                return send_line(writer, "ERR_404 File not found during update").await;
            }
        }
    };

    match sentences::splice_words(&seed, ws.sentence, idx, content) {
        Ok(updated) => {
            if fs::write(&swap, updated).is_err() {
                return send_line(writer, "ERR_500 Could not update temporary file").await;
            }
            send_line(writer, "OK_200 CONTENT INSERTED").await
        }
        Err(e) => send_error(writer, &e).await,
    }
}

async fn commit_write(
    state: &NodeState,
    writer: &mut OwnedWriteHalf,
    ws: &WriteSession,
    session: SessionId,
    username: &str,
) -> Result<()> {
    let swap = state.store.swap_path(&ws.file, ws.sentence, session);
    if !swap.exists() {
        // No edits were made; just release the lock.
        return send_line(writer, "OK_200 WRITE COMPLETED").await;
    }

    let swap_content = fs::read_to_string(&swap).unwrap_or_default();
    if let Err(e) = history::create_backup(&state.store, &ws.file, username) {
        tracing::error!("Backup before commit of '{}' failed: {}", ws.file, e);
        return send_line(writer, "ERR_500 Could not back up file before commit").await;
    }

    // Merge against the live file as it stands right now, not against the
    // snapshot this session started from.
    let live = match state.store.read_file(&ws.file) {
        Ok(content) => content,
        Err(_) => String::new(),
    };
    let merged = sentences::merge_commit(&live, &swap_content, ws.sentence);

    match state.store.replace_file(&ws.file, &merged) {
        Ok(()) => {
            let _ = fs::remove_file(&swap);
            tracing::info!(
                "WRITE committed on '{}' sentence {} by {}",
                ws.file,
                ws.sentence,
                username
            );
            send_line(writer, "OK_200 WRITE COMPLETED").await
        }
        Err(e) => send_error(writer, &e).await,
    }
}

// --- UNDO ---

async fn handle_undo(
    state: &NodeState,
    writer: &mut OwnedWriteHalf,
    file: &str,
    username: &str,
) -> Result<()> {
    if file.is_empty() {
        return send_line(writer, "ERR_400 Usage: UNDO <filename>").await;
    }
    if state.locks.file_locked(file) {
        return send_line(writer, "ERR_409 Cannot undo: file is currently being edited").await;
    }
    if !state.store.exists(file) {
        return send_line(writer, "ERR_404 File not found").await;
    }
    match history::perform_undo(&state.store, file) {
        Ok(()) => {
            tracing::info!("UNDO on '{}' by {}", file, username);
            send_line(writer, "OK_200 UNDO COMPLETED").await
        }
        Err(e) => send_error(writer, &e).await,
    }
}

// --- CREATE / DELETE ---

async fn handle_create(
    state: &NodeState,
    writer: &mut OwnedWriteHalf,
    file: &str,
    username: &str,
) -> Result<()> {
    if file.is_empty() {
        return send_line(writer, "ERR_400 Usage: CREATE <filename>").await;
    }
    match state.store.create_file(file, username) {
        Ok(()) => send_line(writer, "OK_201 CREATED").await,
        Err(e) => send_error(writer, &e).await,
    }
}

async fn handle_delete(state: &NodeState, writer: &mut OwnedWriteHalf, file: &str) -> Result<()> {
    if file.is_empty() {
        return send_line(writer, "ERR_400 Usage: DELETE <filename>").await;
    }
    match state.store.delete_file(file) {
        Ok(()) => send_line(writer, "OK_200 DELETED").await,
        Err(e) => send_error(writer, &e).await,
    }
}

// --- Checkpoints ---

async fn handle_checkpoint(
    state: &NodeState,
    writer: &mut OwnedWriteHalf,
    args: &str,
    username: &str,
) -> Result<()> {
    let mut parts = args.split_whitespace();
    let (Some(file), Some(tag)) = (parts.next(), parts.next()) else {
        return send_line(writer, "ERR_400 Usage: CHECKPOINT <filename> <tag>").await;
    };
    if state.locks.file_locked(file) {
        return send_line(
            writer,
            "ERR_409 Cannot create checkpoint: file is currently being edited",
        )
        .await;
    }
    match checkpoints::create(&state.store, file, tag, username) {
        Ok(()) => send_line(writer, "OK_200 CHECKPOINT CREATED").await,
        Err(e) => send_error(writer, &e).await,
    }
}

async fn handle_view_checkpoint(
    state: &NodeState,
    writer: &mut OwnedWriteHalf,
    args: &str,
) -> Result<()> {
    let mut parts = args.split_whitespace();
    let (Some(file), Some(tag)) = (parts.next(), parts.next()) else {
        return send_line(writer, "ERR_400 Usage: VIEWCHECKPOINT <filename> <tag>").await;
    };
    match checkpoints::view(&state.store, file, tag) {
        Ok(content) if content.is_empty() => send_line(writer, "OK_200 EMPTY_CHECKPOINT").await,
        Ok(content) => {
            send_line(writer, "OK_200 CHECKPOINT_CONTENT").await?;
            writer.write_all(content.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            send_line(writer, status::END_OF_CHECKPOINT).await
        }
        Err(e) => send_error(writer, &e).await,
    }
}

async fn handle_revert(
    state: &NodeState,
    writer: &mut OwnedWriteHalf,
    args: &str,
    username: &str,
) -> Result<()> {
    let mut parts = args.split_whitespace();
    let (Some(file), Some(tag)) = (parts.next(), parts.next()) else {
        return send_line(writer, "ERR_400 Usage: REVERT <filename> <tag>").await;
    };
    if state.locks.file_locked(file) {
        return send_line(writer, "ERR_409 Cannot revert: file is currently being edited").await;
    }
    if !state.store.exists(file) {
        return send_line(writer, "ERR_404 File not found").await;
    }
    match checkpoints::revert(&state.store, file, tag, username) {
        Ok(()) => send_line(writer, "OK_200 REVERT COMPLETED").await,
        Err(e) => send_error(writer, &e).await,
    }
}

async fn handle_list_checkpoints(
    state: &NodeState,
    writer: &mut OwnedWriteHalf,
    file: &str,
) -> Result<()> {
    if file.is_empty() {
        return send_line(writer, "ERR_400 Usage: LISTCHECKPOINTS <filename>").await;
    }
    send_line(writer, "OK_200 CHECKPOINT_LIST").await?;
    writer
        .write_all(checkpoints::list(&state.store, file).as_bytes())
        .await?;
    send_line(writer, status::END_OF_LIST).await
}

// --- Access requests ---

async fn handle_request_access(
    state: &NodeState,
    writer: &mut OwnedWriteHalf,
    args: &str,
    username: &str,
) -> Result<()> {
    let mut parts = args.split_whitespace();
    let (Some(file), Some(flag)) = (parts.next(), parts.next()) else {
        return send_line(writer, "ERR_400 Usage: REQUESTACCESS <filename> <-R|-W>").await;
    };
    if requests::parse_perm_flag(flag).is_none() {
        return send_line(
            writer,
            "ERR_400 Invalid permission. Use -R for read or -W for write",
        )
        .await;
    }
    if !state.store.exists(file) {
        return send_line(writer, "ERR_404 File not found").await;
    }
    if state.store.is_owner(file, username) {
        return send_line(writer, "ERR_400 You already own this file").await;
    }
    if requests::already_granted(&state.store, file, username, flag) {
        return send_line(
            writer,
            "ERR_409 You already have the requested access to this file",
        )
        .await;
    }
    match requests::submit(&state.store, file, username, flag) {
        Ok(()) => send_line(writer, "OK_200 ACCESS REQUEST SUBMITTED").await,
        Err(e) => send_error(writer, &e).await,
    }
}

async fn handle_view_requests(
    state: &NodeState,
    writer: &mut OwnedWriteHalf,
    args: &str,
    username: &str,
) -> Result<()> {
    let file = args.split_whitespace().next().unwrap_or("");
    let listing = if file.is_empty() {
        requests::list_for_owner(&state.store, username)
    } else {
        if !state.store.is_owner(file, username) {
            return send_line(
                writer,
                "ERR_403 You can only view requests for files you own",
            )
            .await;
        }
        requests::list_for_file(&state.store, file)
    };
    send_line(writer, "OK_200 ACCESS_REQUESTS").await?;
    writer.write_all(listing.as_bytes()).await?;
    send_line(writer, status::END_OF_REQUESTS).await
}

async fn handle_approve(
    state: &NodeState,
    writer: &mut OwnedWriteHalf,
    args: &str,
    username: &str,
) -> Result<()> {
    let mut parts = args.split_whitespace();
    let (Some(file), Some(requester), Some(flag)) = (parts.next(), parts.next(), parts.next())
    else {
        return send_line(
            writer,
            "ERR_400 Usage: APPROVEREQUEST <filename> <username> <-R|-W>",
        )
        .await;
    };
    if requests::parse_perm_flag(flag).is_none() {
        return send_line(
            writer,
            "ERR_400 Invalid permission. Use -R for read or -W for write",
        )
        .await;
    }
    if !state.store.is_owner(file, username) {
        return send_line(
            writer,
            "ERR_403 You can only approve requests for files you own",
        )
        .await;
    }
    match requests::approve(&state.store, file, requester, flag) {
        Ok(()) => send_line(writer, "OK_200 ACCESS REQUEST APPROVED").await,
        Err(e) => send_error(writer, &e).await,
    }
}

async fn handle_deny(
    state: &NodeState,
    writer: &mut OwnedWriteHalf,
    args: &str,
    username: &str,
) -> Result<()> {
    let mut parts = args.split_whitespace();
    let (Some(file), Some(requester)) = (parts.next(), parts.next()) else {
        return send_line(writer, "ERR_400 Usage: DENYREQUEST <filename> <username>").await;
    };
    if !state.store.is_owner(file, username) {
        return send_line(
            writer,
            "ERR_403 You can only deny requests for files you own",
        )
        .await;
    }
    match requests::deny(&state.store, file, requester) {
        Ok(()) => send_line(writer, "OK_200 ACCESS REQUEST DENIED").await,
        Err(e) => send_error(writer, &e).await,
    }
}
