use std::io::Write as _;

use anyhow::Result;
use distributed_textstore::client::session::{DirectorySession, NodeSession};
use distributed_textstore::protocol::frames::MsgType;
use distributed_textstore::protocol::status;
use distributed_textstore::protocol::types::{
    AccessGrant, Permission, VIEW_FLAG_ALL, VIEW_FLAG_LONG,
};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 3 {
        eprintln!("Usage: {} <directory_ip> <directory_port>", args[0]);
        std::process::exit(1);
    }
    let port: u32 = args[2].parse().unwrap_or(0);
    if !(1025..=65535).contains(&port) {
        eprintln!("Error: port must be between 1025 and 65535.");
        std::process::exit(1);
    }
    let directory = format!("{}:{}", args[1], port);

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    print!("Enter your username: ");
    std::io::stdout().flush()?;
    let username = match stdin.next_line().await? {
        Some(line) if !line.trim().is_empty() => line.trim().to_string(),
        _ => {
            eprintln!("A username is required.");
            std::process::exit(1);
        }
    };

    let mut session = match DirectorySession::connect(&directory, &username).await {
        Ok(session) => session,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    println!("Connected to the Directory as '{username}'. Type 'help' for commands.");

    loop {
        print!("{username} > ");
        std::io::stdout().flush()?;
        let Some(line) = stdin.next_line().await? else {
            break;
        };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }

        let mut parts = line.split_whitespace();
        let cmd = parts.next().unwrap_or_default().to_lowercase();
        let args: Vec<&str> = parts.collect();

        let outcome = match (cmd.as_str(), args.as_slice()) {
            ("exit", _) => break,
            ("help", _) => {
                print_help();
                Ok(())
            }
            ("create", [file]) => ack_command(&mut session, MsgType::Create, file, "File created").await,
            ("delete", [file]) => ack_command(&mut session, MsgType::Delete, file, "File deleted").await,
            ("undo", [file]) => ack_command(&mut session, MsgType::Undo, file, "Undo completed").await,
            ("createfolder", [folder]) => {
                ack_command(&mut session, MsgType::CreateFolder, folder, "Folder created").await
            }
            ("read", [file]) => do_read(&mut session, file).await,
            ("stream", [file]) => do_stream(&mut session, file).await,
            ("write", [file, sentence]) => do_write(&mut session, &mut stdin, file, sentence).await,
            ("info", [file]) => do_info(&mut session, file).await,
            ("list", _) => do_list(&mut session).await,
            ("view", rest) => do_view(&mut session, rest, None).await,
            ("viewfolder", [folder, rest @ ..]) => do_view(&mut session, rest, Some(folder)).await,
            ("move", [file, folder]) => session
                .move_file(file, folder)
                .await
                .map(|_| println!("File moved.")),
            ("movefolder", [src, dst]) => session
                .move_folder(src, dst)
                .await
                .map(|_| println!("Folder moved.")),
            ("addaccess", [file, user, flag]) => do_add_access(&mut session, file, user, flag).await,
            ("remaccess", [file, user]) => session
                .expect_ack(MsgType::RemAccess, file, user.as_bytes().to_vec())
                .await
                .map(|_| println!("Access updated.")),
            ("locate", [file]) => session
                .locate(file)
                .await
                .map(|addr| println!("File is on node {addr}")),
            ("checkpoint", [file, tag]) => {
                node_command(&mut session, MsgType::Checkpoint, file, &format!("CHECKPOINT {file} {tag}")).await
            }
            ("revert", [file, tag]) => {
                node_command(&mut session, MsgType::Revert, file, &format!("REVERT {file} {tag}")).await
            }
            ("viewcheckpoint", [file, tag]) => {
                do_view_checkpoint(&mut session, file, tag).await
            }
            ("listcheckpoints", [file]) => do_list_checkpoints(&mut session, file).await,
            ("requestaccess", [file, flag]) => {
                located_command(&mut session, file, &format!("REQUESTACCESS {file} {flag}")).await
            }
            ("viewrequests", rest) => do_view_requests(&mut session, rest).await,
            ("approverequest", [file, user, flag]) => {
                located_command(&mut session, file, &format!("APPROVEREQUEST {file} {user} {flag}")).await
            }
            ("denyrequest", [file, user]) => {
                located_command(&mut session, file, &format!("DENYREQUEST {file} {user}")).await
            }
            ("exec", [file]) => {
                // EXEC consumes the Directory connection: stream the output,
                // then reconnect and authenticate again.
                let output = session.exec(file).await;
                println!("--- Exec Output ---");
                match output {
                    Ok(bytes) => print!("{}", String::from_utf8_lossy(&bytes)),
                    Err(e) => println!("Error: {e}"),
                }
                println!("--- Exec Finished (connection closed by server) ---");
                println!("Reconnecting to the Directory...");
                session = match DirectorySession::connect(&directory, &username).await {
                    Ok(session) => session,
                    Err(e) => {
                        eprintln!("Failed to reconnect: {e}");
                        std::process::exit(1);
                    }
                };
                Ok(())
            }
            _ => {
                println!("Unknown command. Type 'help' for a list.");
                Ok(())
            }
        };

        if let Err(e) = outcome {
            println!("Error: {e}");
        }
    }
    Ok(())
}

fn print_help() {
    println!("Commands:");
    println!("  create <file>                     delete <file>");
    println!("  read <file>                       write <file> <sentence>");
    println!("  stream <file>                     undo <file>");
    println!("  info <file>                       list");
    println!("  view [-a] [-l]                    viewfolder <folder> [-a] [-l]");
    println!("  createfolder <name>               move <file> <folder>");
    println!("  movefolder <src> <dst>            locate <file>");
    println!("  addaccess <file> <user> <-R|-W>   remaccess <file> <user>");
    println!("  checkpoint <file> <tag>           viewcheckpoint <file> <tag>");
    println!("  revert <file> <tag>               listcheckpoints <file>");
    println!("  requestaccess <file> <-R|-W>      viewrequests [file]");
    println!("  approverequest <file> <user> <-R|-W>");
    println!("  denyrequest <file> <user>");
    println!("  exec <file>                       exit");
}

async fn ack_command(
    session: &mut DirectorySession,
    msg_type: MsgType,
    name: &str,
    success: &str,
) -> Result<()> {
    session.expect_ack(msg_type, name, Vec::new()).await?;
    println!("{success}.");
    Ok(())
}

/// Redirect flow shared by all Node-side commands: ask the Directory where
/// the file lives, connect there, authenticate, run one command. A failed
/// connection is reported back as a dead-node observation.
async fn open_node(
    session: &mut DirectorySession,
    msg_type: MsgType,
    name: &str,
) -> Result<NodeSession> {
    let addr = session.redirect(msg_type, name).await?;
    match NodeSession::connect(&addr, &session.username).await {
        Ok(node) => Ok(node),
        Err(e) => {
            println!("Could not connect to node {addr}; notifying the Directory.");
            session.report_dead_node(&addr).await?;
            Err(e)
        }
    }
}

async fn node_command(
    session: &mut DirectorySession,
    redirect: MsgType,
    file: &str,
    command: &str,
) -> Result<()> {
    let mut node = open_node(session, redirect, file).await?;
    let reply = node.command(command).await?;
    println!("{reply}");
    node.exit().await;
    Ok(())
}

/// Like `node_command` but routed via LOCATE_FILE, which skips permission
/// checks (needed to submit access requests against files one cannot read).
async fn located_command(
    session: &mut DirectorySession,
    file: &str,
    command: &str,
) -> Result<()> {
    let mut node = open_node(session, MsgType::LocateFile, file).await?;
    let reply = node.command(command).await?;
    println!("{reply}");
    node.exit().await;
    Ok(())
}

async fn do_read(session: &mut DirectorySession, file: &str) -> Result<()> {
    let mut node = open_node(session, MsgType::Read, file).await?;
    let header = node.command(&format!("READ {file}")).await?;
    println!("--- File Content ---");
    if header.starts_with("OK_200 FILE_CONTENT") {
        let body = node.read_until(status::END_OF_FILE).await?;
        print!("{body}");
    } else if !header.starts_with("OK_200") {
        println!("{header}");
    }
    println!("--- End of File ---");
    node.exit().await;
    Ok(())
}

async fn do_stream(session: &mut DirectorySession, file: &str) -> Result<()> {
    let mut node = open_node(session, MsgType::Stream, file).await?;
    let header = node.command(&format!("STREAM {file}")).await?;
    if !header.starts_with("OK_200") {
        println!("{header}");
        node.exit().await;
        return Ok(());
    }
    if header.contains("EMPTY_FILE_STREAM") {
        println!("(empty file)");
        node.exit().await;
        return Ok(());
    }
    println!("Streaming content:");
    loop {
        let word = node.read_line().await?;
        let word = word.trim();
        if word == status::STREAM_COMPLETE || word == status::STREAM_STOPPED {
            break;
        }
        print!("{word} ");
        std::io::stdout().flush()?;
    }
    println!();
    node.exit().await;
    Ok(())
}

async fn do_write(
    session: &mut DirectorySession,
    stdin: &mut tokio::io::Lines<BufReader<tokio::io::Stdin>>,
    file: &str,
    sentence: &str,
) -> Result<()> {
    if sentence.parse::<usize>().is_err() {
        println!("Sentence must be a positive number.");
        return Ok(());
    }
    let mut node = open_node(session, MsgType::Write, file).await?;
    let reply = node.command(&format!("WRITE {file} {sentence}")).await?;
    println!("{reply}");
    if !reply.starts_with("OK_200") {
        node.exit().await;
        return Ok(());
    }

    println!("Entering WRITE mode. Send '<word_index> <content>' or 'ETIRW' to finish.");
    loop {
        print!("write > ");
        std::io::stdout().flush()?;
        let Some(line) = stdin.next_line().await? else {
            break;
        };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        let reply = node.command(&line).await?;
        println!("{reply}");
        if reply.starts_with("OK_200 WRITE COMPLETED") {
            break;
        }
    }
    node.exit().await;
    Ok(())
}

async fn do_info(session: &mut DirectorySession, file: &str) -> Result<()> {
    let info = session.fetch_info(file).await?;
    println!("--> File: {}", info.name);
    println!("--> Owner: {}", info.owner);
    println!("--> Stored on: {}:{}", info.node_ip, info.node_port);
    println!("--> Words: {} | Size: {} bytes", info.word_count, info.char_count);
    print!("--> Access: {} (RW)", info.owner);
    for entry in &info.acl {
        let perm = match entry.permission {
            Permission::Write => "RW",
            Permission::Read => "R",
            Permission::None => "-",
        };
        print!(", {} ({})", entry.identity, perm);
    }
    println!();
    let accessed_by = if info.last_accessed_by.is_empty() {
        "N/A"
    } else {
        &info.last_accessed_by
    };
    println!("--> Last Accessed by: {accessed_by}");
    Ok(())
}

async fn do_list(session: &mut DirectorySession) -> Result<()> {
    let list = session.fetch_user_list().await?;
    println!("--- Active Users ---");
    if list.is_empty() {
        println!("(No users online)");
    } else {
        print!("{list}");
    }
    println!("--------------------");
    Ok(())
}

fn parse_view_flags(args: &[&str]) -> i32 {
    let mut flags = 0;
    for arg in args {
        match *arg {
            "-a" => flags |= VIEW_FLAG_ALL,
            "-l" => flags |= VIEW_FLAG_LONG,
            _ => {}
        }
    }
    flags
}

async fn do_view(
    session: &mut DirectorySession,
    args: &[&str],
    folder: Option<&str>,
) -> Result<()> {
    let flags = parse_view_flags(args);
    let listing = match folder {
        Some(folder) => session.fetch_view_folder(folder, flags).await?,
        None => session.fetch_view(flags).await?,
    };
    if listing.is_empty() {
        println!("(No files found)");
        return Ok(());
    }
    if flags & VIEW_FLAG_LONG != 0 {
        println!("| T |  Filename  | Words | Chars | Last Access Time | Owner |");
        println!("|---|------------|-------|-------|------------------|-------|");
    }
    print!("{listing}");
    Ok(())
}

async fn do_add_access(
    session: &mut DirectorySession,
    file: &str,
    user: &str,
    flag: &str,
) -> Result<()> {
    let permission = match flag {
        "-R" => Permission::Read,
        "-W" => Permission::Write,
        _ => {
            println!("Invalid permission. Use -R for read or -W for write.");
            return Ok(());
        }
    };
    let grant = AccessGrant {
        identity: user.to_string(),
        permission,
    };
    session
        .expect_ack(MsgType::AddAccess, file, grant.encode())
        .await?;
    println!("Access updated.");
    Ok(())
}

async fn do_view_checkpoint(session: &mut DirectorySession, file: &str, tag: &str) -> Result<()> {
    let mut node = open_node(session, MsgType::ViewCheckpoint, file).await?;
    let header = node.command(&format!("VIEWCHECKPOINT {file} {tag}")).await?;
    if header.starts_with("OK_200 CHECKPOINT_CONTENT") {
        let body = node.read_until(status::END_OF_CHECKPOINT).await?;
        print!("{body}");
    } else {
        println!("{header}");
    }
    node.exit().await;
    Ok(())
}

async fn do_list_checkpoints(session: &mut DirectorySession, file: &str) -> Result<()> {
    let mut node = open_node(session, MsgType::ListCheckpoints, file).await?;
    let header = node.command(&format!("LISTCHECKPOINTS {file}")).await?;
    if header.starts_with("OK_200") {
        let body = node.read_until(status::END_OF_LIST).await?;
        print!("{body}");
    } else {
        println!("{header}");
    }
    node.exit().await;
    Ok(())
}

async fn do_view_requests(session: &mut DirectorySession, args: &[&str]) -> Result<()> {
    let Some(file) = args.first() else {
        println!("Usage: viewrequests <file> (listing requests requires naming one of your files)");
        return Ok(());
    };
    let mut node = open_node(session, MsgType::LocateFile, file).await?;
    let header = node.command(&format!("VIEWREQUESTS {file}")).await?;
    if header.starts_with("OK_200") {
        let body = node.read_until(status::END_OF_REQUESTS).await?;
        print!("{body}");
    } else {
        println!("{header}");
    }
    node.exit().await;
    Ok(())
}
