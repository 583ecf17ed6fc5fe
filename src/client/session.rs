//! Client-side session machines for both protocol surfaces.

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::protocol::frames::{Component, FrameHeader, MsgType, read_frame, send_frame};
use crate::protocol::types::{
    FileInfoWire, NodeAddr, ViewArgs, ViewFolderArgs, encode_str_payload,
};

/// Authenticated framed session with the Directory.
pub struct DirectorySession {
    stream: TcpStream,
    pub username: String,
}

impl DirectorySession {
    /// Connects and performs the `REGISTER_CLIENT` handshake.
    pub async fn connect(directory: &str, username: &str) -> Result<Self> {
        let mut stream = TcpStream::connect(directory)
            .await
            .with_context(|| format!("connecting to Directory at {directory}"))?;
        send_frame(
            &mut stream,
            &FrameHeader::with_name(
                MsgType::RegisterClient,
                Component::Client,
                Component::Directory,
                username,
            ),
            &[],
        )
        .await?;
        let (ack, _) = read_frame(&mut stream).await?;
        if ack.msg_type != MsgType::Ack {
            bail!("Directory refused registration: {}", ack.name);
        }
        Ok(Self {
            stream,
            username: username.to_string(),
        })
    }

    /// One request/response exchange. `ERROR` replies become `Err` carrying
    /// the Directory's message.
    pub async fn request(
        &mut self,
        msg_type: MsgType,
        name: &str,
        payload: Vec<u8>,
    ) -> Result<(FrameHeader, Vec<u8>)> {
        send_frame(
            &mut self.stream,
            &FrameHeader::with_name(msg_type, Component::Client, Component::Directory, name),
            &payload,
        )
        .await?;
        let (header, reply_payload) = read_frame(&mut self.stream).await?;
        if header.msg_type == MsgType::Error {
            bail!("{}", header.name);
        }
        Ok((header, reply_payload))
    }

    /// Issues a command whose success reply is a bare `ACK`.
    pub async fn expect_ack(
        &mut self,
        msg_type: MsgType,
        name: &str,
        payload: Vec<u8>,
    ) -> Result<()> {
        let (header, _) = self.request(msg_type, name, payload).await?;
        if header.msg_type != MsgType::Ack {
            bail!("Directory sent unexpected {:?}", header.msg_type);
        }
        Ok(())
    }

    /// Asks for a redirect to the Node owning `name`.
    pub async fn redirect(&mut self, msg_type: MsgType, name: &str) -> Result<NodeAddr> {
        let (header, payload) = self.request(msg_type, name, Vec::new()).await?;
        if !matches!(
            header.msg_type,
            MsgType::ReadRedirect | MsgType::LocateResponse
        ) {
            bail!("Directory sent unexpected {:?}", header.msg_type);
        }
        NodeAddr::decode(&payload)
    }

    pub async fn locate(&mut self, name: &str) -> Result<NodeAddr> {
        self.redirect(MsgType::LocateFile, name).await
    }

    pub async fn fetch_info(&mut self, name: &str) -> Result<FileInfoWire> {
        let (header, payload) = self.request(MsgType::Info, name, Vec::new()).await?;
        if header.msg_type != MsgType::InfoResponse {
            bail!("Directory sent unexpected {:?}", header.msg_type);
        }
        FileInfoWire::decode(&payload)
    }

    pub async fn fetch_user_list(&mut self) -> Result<String> {
        let (_, payload) = self.request(MsgType::List, "", Vec::new()).await?;
        Ok(String::from_utf8_lossy(&payload).into_owned())
    }

    pub async fn fetch_view(&mut self, flags: i32) -> Result<String> {
        let (_, payload) = self
            .request(MsgType::View, "", ViewArgs { flags }.encode())
            .await?;
        Ok(String::from_utf8_lossy(&payload).into_owned())
    }

    pub async fn fetch_view_folder(&mut self, folder: &str, flags: i32) -> Result<String> {
        let args = ViewFolderArgs {
            flags,
            folder: folder.to_string(),
        };
        let (_, payload) = self.request(MsgType::ViewFolder, "", args.encode()).await?;
        Ok(String::from_utf8_lossy(&payload).into_owned())
    }

    pub async fn move_file(&mut self, name: &str, folder: &str) -> Result<()> {
        self.expect_ack(MsgType::MoveFile, name, encode_str_payload(folder))
            .await
    }

    pub async fn move_folder(&mut self, src: &str, dst: &str) -> Result<()> {
        self.expect_ack(MsgType::MoveFolder, src, encode_str_payload(dst))
            .await
    }

    /// Reports an unreachable Node so the Directory can purge it.
    pub async fn report_dead_node(&mut self, addr: &NodeAddr) -> Result<()> {
        self.expect_ack(MsgType::DeadNodeReport, "", addr.encode())
            .await
    }

    /// Sends `EXEC` and drains the raw output until the Directory closes
    /// the connection. The session is consumed; the caller reconnects.
    pub async fn exec(mut self, name: &str) -> Result<Vec<u8>> {
        send_frame(
            &mut self.stream,
            &FrameHeader::with_name(
                MsgType::Exec,
                Component::Client,
                Component::Directory,
                name,
            ),
            &[],
        )
        .await?;
        let mut output = Vec::new();
        self.stream.read_to_end(&mut output).await?;
        Ok(output)
    }
}

/// Line-based session with a Node, opened after a redirect.
pub struct NodeSession {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl NodeSession {
    /// Connects to the Node and performs the `USER` handshake.
    pub async fn connect(addr: &NodeAddr, username: &str) -> Result<Self> {
        let stream = TcpStream::connect((addr.ip.as_str(), addr.port as u16))
            .await
            .with_context(|| format!("connecting to Node at {addr}"))?;
        let (read_half, writer) = stream.into_split();
        let mut session = Self {
            lines: BufReader::new(read_half).lines(),
            writer,
        };
        let greeting = session.command(&format!("USER {username}")).await?;
        if !greeting.starts_with("OK_200") {
            bail!("Node refused handshake: {greeting}");
        }
        Ok(session)
    }

    pub async fn send(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn read_line(&mut self) -> Result<String> {
        match self.lines.next_line().await? {
            Some(line) => Ok(line),
            None => bail!("Node closed the connection"),
        }
    }

    /// Sends one line and reads the single-line reply.
    pub async fn command(&mut self, line: &str) -> Result<String> {
        self.send(line).await?;
        self.read_line().await
    }

    /// Collects lines until `sentinel`, returning the body without it.
    pub async fn read_until(&mut self, sentinel: &str) -> Result<String> {
        let mut body = String::new();
        loop {
            let line = self.read_line().await?;
            if line.trim() == sentinel {
                return Ok(body);
            }
            body.push_str(&line);
            body.push('\n');
        }
    }

    /// Ends the session politely; errors are ignored.
    pub async fn exit(mut self) {
        let _ = self.send("EXIT").await;
        let _ = self.read_line().await;
    }
}
