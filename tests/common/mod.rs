//! Scripted SMB peer shared by the integration tests

#![allow(dead_code)]

use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const USER_ID: [u8; 2] = [0x00, 0x08];
pub const TREE_ID: [u8; 2] = [0x00, 0x28];
pub const OS_NAME: &str = "Windows 7 Professional 7601 Service Pack 1";

pub const STATUS_LOGON_FAILURE: u32 = 0xc000_006d;
pub const STATUS_INSUFF_SERVER_RESOURCES: u32 = 0xc000_0205;
pub const STATUS_INVALID_HANDLE: u32 = 0xc000_0008;

/// One SMBv1 response frame behind its NetBIOS header
pub fn smb_frame(
    command: u8,
    status: u32,
    tid: [u8; 2],
    uid: [u8; 2],
    mid: [u8; 2],
    body: &[u8],
) -> Vec<u8> {
    let payload = 32 + body.len();
    let mut frame = vec![
        0x00,
        (payload >> 16) as u8,
        (payload >> 8) as u8,
        payload as u8,
    ];
    frame.extend_from_slice(&[0xff, b'S', b'M', b'B', command]);
    frame.extend_from_slice(&status.to_le_bytes());
    frame.push(0x98);
    frame.extend_from_slice(&[0x07, 0xc0]);
    frame.resize(28, 0);
    frame.extend_from_slice(&tid);
    frame.extend_from_slice(&[0xfe, 0xff]);
    frame.extend_from_slice(&uid);
    frame.extend_from_slice(&mid);
    frame.extend_from_slice(body);
    frame
}

/// A complete frame that only carries 16 bytes of payload
pub fn short_frame() -> Vec<u8> {
    let mut frame = vec![0x00, 0x00, 0x00, 0x10, 0xff, b'S', b'M', b'B'];
    frame.resize(20, 0);
    frame
}

fn utf16z(text: &str) -> Vec<u8> {
    let mut out: Vec<u8> = text.encode_utf16().flat_map(|c| c.to_le_bytes()).collect();
    out.extend_from_slice(&[0, 0]);
    out
}

pub fn negotiate_ok() -> Vec<u8> {
    smb_frame(0x72, 0, [0, 0], [0, 0], [0x40, 0x00], &[0x00, 0x00, 0x00])
}

pub fn negotiate_refused() -> Vec<u8> {
    smb_frame(0x72, 0xc000_0002, [0, 0], [0, 0], [0x40, 0x00], &[0x00, 0x00, 0x00])
}

pub fn session_setup_ok(uid: [u8; 2], os: &str) -> Vec<u8> {
    let mut strings = vec![0x00];
    strings.extend(utf16z(os));
    strings.extend(utf16z("Windows 7 Professional 6.1"));
    strings.extend(utf16z("WORKGROUP"));

    let mut body = vec![0x03, 0xff, 0x00, 0x00, 0x00, 0x00, 0x00];
    body.extend_from_slice(&(strings.len() as u16).to_le_bytes());
    body.extend(strings);
    smb_frame(0x73, 0, [0, 0], uid, [0x40, 0x00], &body)
}

/// Session setup response whose byte count disagrees with the frame length
pub fn session_setup_malformed(uid: [u8; 2]) -> Vec<u8> {
    let mut frame = session_setup_ok(uid, OS_NAME);
    frame[43] = frame[43].wrapping_add(5);
    frame
}

pub fn session_setup_denied() -> Vec<u8> {
    smb_frame(
        0x73,
        STATUS_LOGON_FAILURE,
        [0, 0],
        [0, 0],
        [0x40, 0x00],
        &[0x00, 0x00, 0x00],
    )
}

pub fn tree_connect_ok(uid: [u8; 2], tid: [u8; 2]) -> Vec<u8> {
    smb_frame(
        0x75,
        0,
        tid,
        uid,
        [0x40, 0x00],
        &[0x03, 0xff, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00],
    )
}

pub fn transaction_response(uid: [u8; 2], tid: [u8; 2], vulnerable: bool) -> Vec<u8> {
    let status = if vulnerable {
        STATUS_INSUFF_SERVER_RESOURCES
    } else {
        STATUS_INVALID_HANDLE
    };
    smb_frame(0x25, status, tid, uid, [0x40, 0x00], &[0x00, 0x00, 0x00])
}

pub fn trans2_response(uid: [u8; 2], tid: [u8; 2], implant: bool) -> Vec<u8> {
    let mid = if implant { [0x51, 0x00] } else { [0x41, 0x00] };
    smb_frame(0x32, 0xc000_0002, tid, uid, mid, &[0x00, 0x00, 0x00])
}

/// Every response of a host that answers all five steps
pub fn vulnerable_host(uid: [u8; 2], tid: [u8; 2], implant: bool) -> Vec<Vec<u8>> {
    vec![
        negotiate_ok(),
        session_setup_ok(uid, OS_NAME),
        tree_connect_ok(uid, tid),
        transaction_response(uid, tid, true),
        trans2_response(uid, tid, implant),
    ]
}

/// Answer one request frame with each scripted response, in order.
///
/// Returns every request received. Stops early when the client hangs up,
/// otherwise keeps the connection open for `hold` once the script ends.
pub async fn serve<S>(mut stream: S, responses: Vec<Vec<u8>>, hold: Duration) -> Vec<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut requests = Vec::new();

    for response in responses {
        let mut header = [0u8; 4];
        if stream.read_exact(&mut header).await.is_err() {
            return requests;
        }
        let len = u32::from_be_bytes([0, header[1], header[2], header[3]]) as usize;
        let mut request = header.to_vec();
        request.resize(4 + len, 0);
        if stream.read_exact(&mut request[4..]).await.is_err() {
            return requests;
        }
        requests.push(request);

        if stream.write_all(&response).await.is_err() {
            return requests;
        }
    }

    if !hold.is_zero() {
        tokio::time::sleep(hold).await;
    }
    requests
}

/// Assert that `sent` equals `template` outside the given two-byte patches
pub fn assert_patched(sent: &[u8], template: &[u8], patches: &[(usize, [u8; 2])]) {
    assert_eq!(sent.len(), template.len());
    for (i, (&got, &blueprint)) in sent.iter().zip(template).enumerate() {
        let patch = patches
            .iter()
            .find(|(offset, _)| i == *offset || i == *offset + 1);
        match patch {
            Some((offset, value)) => assert_eq!(got, value[i - offset], "patched byte {}", i),
            None => assert_eq!(got, blueprint, "template byte {} changed", i),
        }
    }
}
