// MIT License - Copyright (c) 2026 Peter Wright
// SpaClient against a fake controller on a loopback socket

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use spa_lan_bridge::constants::{BUTTON_COMMAND, CONTROL_TYPES, PANEL_REQUEST, STATUS_UPDATE};
use spa_lan_bridge::transport::Framer;
use spa_lan_bridge::{ConnectionState, Frame, SpaClient, SpaConfig, crypto};

const LIMIT: Duration = Duration::from_secs(5);

fn status_frame(temp: u8, target: u8) -> Vec<u8> {
    let mut payload = vec![0u8; 22];
    payload[10] = temp;
    payload[16] = target;
    let mut frame = Frame::new(STATUS_UPDATE, &payload);
    crypto::transform(&mut frame);
    frame.into_bytes()
}

/// Read until a frame of `kind` arrives and return it decrypted.
async fn read_frame(socket: &mut TcpStream, framer: &mut Framer, kind: [u8; 3]) -> Result<Frame> {
    let mut buf = [0u8; 256];
    loop {
        let n = socket.read(&mut buf).await?;
        anyhow::ensure!(n > 0, "client closed the socket");
        let output = framer.feed(&buf[..n], Instant::now());
        if let Some(frame) = output.frames.into_iter().find(|f| f.kind() == kind) {
            return Ok(crypto::decrypt(frame));
        }
    }
}

#[tokio::test]
async fn test_client_tracks_controller() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();

    let config = SpaConfig::builder().host("127.0.0.1").port(port).build();
    let mut client = SpaClient::start(config);

    let (mut socket, _) = timeout(LIMIT, listener.accept()).await??;
    let mut framer = Framer::new(Duration::from_secs(1));
    client.wait_connected(LIMIT).await?;
    assert_eq!(client.connection_state(), ConnectionState::Connected);

    // First thing on a fresh connection is the control types query.
    let query = timeout(LIMIT, read_frame(&mut socket, &mut framer, PANEL_REQUEST)).await??;
    assert_eq!(query.payload(), &[0x00, 0x00, 0x01]);

    socket.write_all(&status_frame(68, 100)).await?;
    let mut state = client.watch_state();
    timeout(LIMIT, state.wait_for(|s| s.current_temperature() == Some(68)))
        .await
        .context("status never applied")??;
    assert_eq!(client.target_temperature(), Some(100));

    socket.write_all(Frame::new(CONTROL_TYPES, &[0; 4]).as_bytes()).await?;
    timeout(LIMIT, state.wait_for(|s| s.is_configuration_known())).await??;

    client.set_pump_speed(2, 1).await?;
    let press = timeout(LIMIT, read_frame(&mut socket, &mut framer, BUTTON_COMMAND)).await??;
    assert_eq!(&press.payload()[1..], &[0x05, 0x00]);

    client.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_invalid_command_rejected_locally() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    let client = SpaClient::start(SpaConfig::builder().host("127.0.0.1").port(port).build());

    assert!(client.set_pump_speed(9, 1).await.is_err());
    assert!(client.set_light(3, true).await.is_err());
    // Valid but not yet runnable: accepted and queued.
    client.set_light(1, true).await?;
    Ok(())
}
