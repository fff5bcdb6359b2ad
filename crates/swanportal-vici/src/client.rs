//! Async VICI client over the daemon's Unix control socket.

use std::path::Path;

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use crate::codec::{encode_packet, parse_packet, Packet, PacketType, MAX_PACKET_LEN};
use crate::ViciError;

/// A connected VICI session.
///
/// The protocol is strictly request/response until events are registered,
/// after which event packets may arrive at any time; [`next_event`]
/// (`Self::next_event`) is the read loop for that phase.
pub struct ViciClient {
    stream: UnixStream,
}

impl ViciClient {
    /// Connect to the daemon's control socket.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, ViciError> {
        let stream = UnixStream::connect(path).await?;
        Ok(Self { stream })
    }

    /// Issue a command with an empty message and return the response body.
    pub async fn request(&mut self, command: &str) -> Result<Value, ViciError> {
        self.send(encode_packet(PacketType::CmdRequest, Some(command)))
            .await?;

        loop {
            let packet = self.read_packet().await?;
            match packet.ptype {
                PacketType::CmdResponse => return Ok(packet.message),
                PacketType::CmdUnknown => {
                    return Err(ViciError::UnknownCommand(command.to_string()))
                }
                // Already-registered events may interleave with responses.
                PacketType::Event => continue,
                other => return Err(ViciError::Unexpected(other as u8)),
            }
        }
    }

    /// Register for an event stream.
    pub async fn subscribe(&mut self, event: &str) -> Result<(), ViciError> {
        self.send(encode_packet(PacketType::EventRegister, Some(event)))
            .await?;

        loop {
            let packet = self.read_packet().await?;
            match packet.ptype {
                PacketType::EventConfirm => return Ok(()),
                PacketType::EventUnknown => {
                    return Err(ViciError::UnknownEvent(event.to_string()))
                }
                PacketType::Event => continue,
                other => return Err(ViciError::Unexpected(other as u8)),
            }
        }
    }

    /// Wait for the next event, returning its name and message body.
    pub async fn next_event(&mut self) -> Result<(String, Value), ViciError> {
        loop {
            let packet = self.read_packet().await?;
            if let Packet {
                ptype: PacketType::Event,
                name: Some(name),
                message,
            } = packet
            {
                return Ok((name, message));
            }
        }
    }

    async fn send(&mut self, body: Vec<u8>) -> Result<(), ViciError> {
        if body.len() > MAX_PACKET_LEN {
            return Err(ViciError::TooLarge);
        }
        self.stream.write_u32(body.len() as u32).await?;
        self.stream.write_all(&body).await?;
        Ok(())
    }

    async fn read_packet(&mut self) -> Result<Packet, ViciError> {
        let len = self.stream.read_u32().await? as usize;
        if len > MAX_PACKET_LEN {
            return Err(ViciError::TooLarge);
        }
        let mut body = vec![0u8; len];
        self.stream.read_exact(&mut body).await?;
        parse_packet(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixListener;

    /// Drive one scripted daemon exchange over a socketpair-style socket.
    async fn fake_daemon(listener: UnixListener) {
        let (mut stream, _) = listener.accept().await.unwrap();

        // Expect a version request.
        let len = stream.read_u32().await.unwrap() as usize;
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await.unwrap();
        let packet = parse_packet(&body).unwrap();
        assert_eq!(packet.ptype, PacketType::CmdRequest);
        assert_eq!(packet.name.as_deref(), Some("version"));

        // Respond with a key-value body.
        let mut response = encode_packet(PacketType::CmdResponse, None);
        response.push(3); // KEY_VALUE
        response.push(6);
        response.extend_from_slice(b"daemon");
        response.extend_from_slice(&6u16.to_be_bytes());
        response.extend_from_slice(b"charon");
        stream.write_u32(response.len() as u32).await.unwrap();
        stream.write_all(&response).await.unwrap();

        // Expect an event registration, confirm it.
        let len = stream.read_u32().await.unwrap() as usize;
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await.unwrap();
        let packet = parse_packet(&body).unwrap();
        assert_eq!(packet.ptype, PacketType::EventRegister);

        let confirm = encode_packet(PacketType::EventConfirm, None);
        stream.write_u32(confirm.len() as u32).await.unwrap();
        stream.write_all(&confirm).await.unwrap();

        // Emit one event.
        let event = encode_packet(PacketType::Event, Some("ike-updown"));
        stream.write_u32(event.len() as u32).await.unwrap();
        stream.write_all(&event).await.unwrap();
    }

    #[tokio::test]
    async fn test_request_subscribe_event_flow() {
        let dir = std::env::temp_dir().join(format!("vici-test-{}", std::process::id()));
        let _ = std::fs::remove_file(&dir);
        let listener = UnixListener::bind(&dir).unwrap();
        let daemon = tokio::spawn(fake_daemon(listener));

        let mut client = ViciClient::connect(&dir).await.unwrap();

        let version = client.request("version").await.unwrap();
        assert_eq!(version["daemon"], "charon");

        client.subscribe("ike-updown").await.unwrap();

        let (name, _) = client.next_event().await.unwrap();
        assert_eq!(name, "ike-updown");

        daemon.await.unwrap();
        let _ = std::fs::remove_file(&dir);
    }
}
