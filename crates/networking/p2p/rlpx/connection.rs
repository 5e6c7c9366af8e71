use std::time::Duration;

use k256::{PublicKey, SecretKey};
use sha3::{Digest, Keccak256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};
use wyrm_common::{H256, H512};
use wyrm_rlp::decode::RLPDecode;

use super::{
    error::RLPxError,
    frame,
    handshake::{decode_ack_message, decode_auth_message, encode_ack_message, encode_auth_message},
    message::Message,
    p2p::{Capability, HelloMessage},
    utils::{ecdh_xchng, id2pubkey},
};

pub const SUPPORTED_CAPABILITIES: [(Capability, u8); 2] =
    [(Capability::P2p, 5), (Capability::Eth, 68)];

/// Every handshake phase (auth, ack, hello — each send and each receive)
/// races against this deadline.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) type Aes256Ctr64BE = ctr::Ctr64BE<aes::Aes256>;

/// An RLPx connection over a full-duplex byte stream.
///
/// Created in either role, it drives the authentication handshake and the
/// Hello exchange; once established it frames and unfames messages with the
/// session secrets.
pub struct RLPxConnection<S> {
    signer: SecretKey,
    state: RLPxConnectionState,
    stream: S,
    capabilities: Vec<(Capability, u8)>,
}

impl<S: AsyncWrite + AsyncRead + std::marker::Unpin> RLPxConnection<S> {
    fn new(signer: SecretKey, stream: S, state: RLPxConnectionState) -> Self {
        Self {
            signer,
            state,
            stream,
            capabilities: vec![],
        }
    }

    /// Sets up the initiator side towards a known peer.
    pub fn initiator(signer: SecretKey, remote_node_id: H512, stream: S) -> Self {
        let mut rng = rand::thread_rng();
        let state = RLPxConnectionState::Initiator(Initiator::new(
            H256::random_using(&mut rng),
            SecretKey::random(&mut rng),
            remote_node_id,
        ));
        Self::new(signer, stream, state)
    }

    /// Sets up the recipient side for an inbound connection.
    pub fn receiver(signer: SecretKey, stream: S) -> Self {
        let mut rng = rand::thread_rng();
        let state = RLPxConnectionState::Receiver(Receiver::new(
            H256::random_using(&mut rng),
            SecretKey::random(&mut rng),
        ));
        Self::new(signer, stream, state)
    }

    /// Runs the full handshake for whichever role this connection was
    /// created in: the authentication roundtrip, then the Hello exchange
    /// over the freshly framed transport.
    ///
    /// Timeouts surface as [`RLPxError::TimeoutExpired`]; every crypto or
    /// decode failure is reported as the opaque
    /// [`RLPxError::HandshakeFailed`]. In all error cases the connection is
    /// unusable and should be dropped, closing the socket.
    pub async fn handshake(&mut self) -> Result<(), RLPxError> {
        match &self.state {
            RLPxConnectionState::Initiator(_) => {
                self.send_auth().await?;
                self.receive_ack().await?;
            }
            RLPxConnectionState::Receiver(_) => {
                self.receive_auth().await?;
                self.send_ack().await?;
            }
            _ => return Err(RLPxError::InvalidState),
        };
        debug!("Completed authentication handshake");

        self.exchange_hello_messages().await?;
        if let Ok(remote_node_id) = self.get_remote_node_id() {
            info!("Completed handshake with peer 0x{}", hex::encode(remote_node_id));
        }
        Ok(())
    }

    async fn exchange_hello_messages(&mut self) -> Result<(), RLPxError> {
        let hello_msg = Message::Hello(HelloMessage::new(
            SUPPORTED_CAPABILITIES.to_vec(),
            self.signer.public_key(),
        ));

        timed(self.send(hello_msg)).await?;

        match timed(self.receive()).await.map_err(opaque)? {
            Message::Hello(hello_message) => {
                self.capabilities = hello_message.capabilities;

                // at least one shared capability is required to proceed
                if self
                    .capabilities
                    .iter()
                    .any(|cap| SUPPORTED_CAPABILITIES.contains(cap))
                {
                    Ok(())
                } else {
                    Err(RLPxError::HandshakeFailed)
                }
            }
            _ => Err(RLPxError::HandshakeFailed),
        }
    }

    /// Capabilities announced by the peer in its Hello.
    pub fn peer_capabilities(&self) -> &[(Capability, u8)] {
        &self.capabilities
    }

    pub fn get_remote_node_id(&self) -> Result<H512, RLPxError> {
        match &self.state {
            RLPxConnectionState::Established(state) => Ok(state.remote_node_id),
            _ => Err(RLPxError::InvalidState),
        }
    }

    async fn send_auth(&mut self) -> Result<(), RLPxError> {
        match &self.state {
            RLPxConnectionState::Initiator(initiator_state) => {
                let peer_pk =
                    id2pubkey(initiator_state.remote_node_id).ok_or(RLPxError::InvalidPeerId)?;

                let previous_state = initiator_state.clone();

                let msg = encode_auth_message(
                    &self.signer,
                    previous_state.nonce,
                    &peer_pk,
                    &previous_state.ephemeral_key,
                )
                .map_err(opaque)?;

                timed(self.send_handshake_msg(&msg)).await?;

                self.state =
                    RLPxConnectionState::InitiatedAuth(InitiatedAuth::new(previous_state, msg));
                Ok(())
            }
            _ => Err(RLPxError::InvalidState),
        }
    }

    async fn send_ack(&mut self) -> Result<(), RLPxError> {
        match &self.state {
            RLPxConnectionState::ReceivedAuth(received_auth_state) => {
                let peer_pk =
                    id2pubkey(received_auth_state.remote_node_id).ok_or(RLPxError::InvalidPeerId)?;

                let previous_state = received_auth_state.clone();

                let msg = encode_ack_message(
                    &previous_state.local_ephemeral_key,
                    previous_state.local_nonce,
                    &peer_pk,
                )
                .map_err(opaque)?;

                timed(self.send_handshake_msg(&msg)).await?;

                self.state = RLPxConnectionState::Established(Box::new(Established::for_receiver(
                    previous_state,
                    msg,
                )));
                Ok(())
            }
            _ => Err(RLPxError::InvalidState),
        }
    }

    async fn receive_auth(&mut self) -> Result<(), RLPxError> {
        match &self.state {
            RLPxConnectionState::Receiver(receiver_state) => {
                let previous_state = receiver_state.clone();
                let msg_bytes = timed(self.receive_handshake_msg()).await?;
                let size_data = msg_bytes
                    .get(..2)
                    .ok_or(RLPxError::InvalidMessageLength)?;
                let msg = msg_bytes
                    .get(2..)
                    .ok_or(RLPxError::InvalidMessageLength)?;
                let (auth, remote_ephemeral_key) =
                    decode_auth_message(&self.signer, msg, size_data).map_err(opaque)?;

                self.state = RLPxConnectionState::ReceivedAuth(ReceivedAuth::new(
                    previous_state,
                    auth.node_id,
                    msg_bytes.to_owned(),
                    auth.nonce,
                    remote_ephemeral_key,
                ));
                Ok(())
            }
            _ => Err(RLPxError::InvalidState),
        }
    }

    async fn receive_ack(&mut self) -> Result<(), RLPxError> {
        match &self.state {
            RLPxConnectionState::InitiatedAuth(initiated_auth_state) => {
                let previous_state = initiated_auth_state.clone();
                let msg_bytes = timed(self.receive_handshake_msg()).await?;
                let size_data = msg_bytes
                    .get(..2)
                    .ok_or(RLPxError::InvalidMessageLength)?;
                let msg = msg_bytes
                    .get(2..)
                    .ok_or(RLPxError::InvalidMessageLength)?;
                let ack = decode_ack_message(&self.signer, msg, size_data).map_err(opaque)?;
                let remote_ephemeral_key = ack
                    .get_ephemeral_pubkey()
                    .ok_or(RLPxError::HandshakeFailed)?;

                self.state = RLPxConnectionState::Established(Box::new(Established::for_initiator(
                    previous_state,
                    msg_bytes.to_owned(),
                    ack.nonce,
                    remote_ephemeral_key,
                )));
                Ok(())
            }
            _ => Err(RLPxError::InvalidState),
        }
    }

    async fn send_handshake_msg(&mut self, msg: &[u8]) -> Result<(), RLPxError> {
        self.stream
            .write_all(msg)
            .await
            .map_err(|_| RLPxError::ConnectionError("Could not send message".to_string()))?;
        Ok(())
    }

    async fn receive_handshake_msg(&mut self) -> Result<Vec<u8>, RLPxError> {
        // the u16 size prefix tells how much to read
        let mut size_data = [0; 2];
        self.stream
            .read_exact(&mut size_data)
            .await
            .map_err(|_| RLPxError::ConnectionError("Connection dropped".to_string()))?;
        let msg_size = u16::from_be_bytes(size_data) as usize;

        let mut buf = vec![0; msg_size + 2];
        buf[..2].copy_from_slice(&size_data);
        self.stream
            .read_exact(&mut buf[2..])
            .await
            .map_err(|_| RLPxError::ConnectionError("Connection dropped".to_string()))?;
        Ok(buf)
    }

    /// Sends a message over the established, framed transport.
    pub async fn send(&mut self, message: Message) -> Result<(), RLPxError> {
        match &mut self.state {
            RLPxConnectionState::Established(state) => {
                let mut frame_buffer = vec![];
                message.encode(&mut frame_buffer)?;
                frame::write(frame_buffer, state, &mut self.stream).await
            }
            _ => Err(RLPxError::InvalidState),
        }
    }

    /// Receives a message from the established, framed transport.
    pub async fn receive(&mut self) -> Result<Message, RLPxError> {
        match &mut self.state {
            RLPxConnectionState::Established(state) => {
                let frame_data = frame::read(state, &mut self.stream).await?;
                let (msg_id, msg_data): (u8, _) = RLPDecode::decode_unfinished(&frame_data)?;
                Ok(Message::decode(msg_id, msg_data)?)
            }
            _ => Err(RLPxError::InvalidState),
        }
    }

    #[cfg(test)]
    pub(crate) fn session_secrets(&self) -> Option<(H256, H256)> {
        match &self.state {
            RLPxConnectionState::Established(state) => Some((state.aes_key, state.mac_key)),
            _ => None,
        }
    }
}

// The `op || timeout` race: whichever finishes first wins, the loser is
// cancelled with the socket operation aborted.
async fn timed<T>(
    op: impl std::future::Future<Output = Result<T, RLPxError>>,
) -> Result<T, RLPxError> {
    tokio::time::timeout(HANDSHAKE_TIMEOUT, op)
        .await
        .map_err(|_| RLPxError::TimeoutExpired)?
}

// Collapses crypto and decode failures into the opaque handshake error so
// callers (and the wire) learn nothing about the failing stage.
fn opaque(err: RLPxError) -> RLPxError {
    match err {
        RLPxError::TimeoutExpired | RLPxError::ConnectionError(_) => err,
        _ => RLPxError::HandshakeFailed,
    }
}

enum RLPxConnectionState {
    Initiator(Initiator),
    Receiver(Receiver),
    ReceivedAuth(ReceivedAuth),
    InitiatedAuth(InitiatedAuth),
    Established(Box<Established>),
}

#[derive(Clone)]
struct Receiver {
    pub(crate) nonce: H256,
    pub(crate) ephemeral_key: SecretKey,
}

impl Receiver {
    pub fn new(nonce: H256, ephemeral_key: SecretKey) -> Self {
        Self {
            nonce,
            ephemeral_key,
        }
    }
}

#[derive(Clone)]
struct Initiator {
    pub(crate) nonce: H256,
    pub(crate) ephemeral_key: SecretKey,
    pub(crate) remote_node_id: H512,
}

impl Initiator {
    pub fn new(nonce: H256, ephemeral_key: SecretKey, remote_node_id: H512) -> Self {
        Self {
            nonce,
            ephemeral_key,
            remote_node_id,
        }
    }
}

#[derive(Clone)]
struct ReceivedAuth {
    pub(crate) local_nonce: H256,
    pub(crate) local_ephemeral_key: SecretKey,
    pub(crate) remote_node_id: H512,
    pub(crate) remote_nonce: H256,
    pub(crate) remote_ephemeral_key: PublicKey,
    pub(crate) remote_init_message: Vec<u8>,
}

impl ReceivedAuth {
    pub fn new(
        previous_state: Receiver,
        remote_node_id: H512,
        remote_init_message: Vec<u8>,
        remote_nonce: H256,
        remote_ephemeral_key: PublicKey,
    ) -> Self {
        Self {
            local_nonce: previous_state.nonce,
            local_ephemeral_key: previous_state.ephemeral_key,
            remote_node_id,
            remote_nonce,
            remote_ephemeral_key,
            remote_init_message,
        }
    }
}

#[derive(Clone)]
struct InitiatedAuth {
    pub(crate) remote_node_id: H512,
    pub(crate) local_nonce: H256,
    pub(crate) local_ephemeral_key: SecretKey,
    pub(crate) local_init_message: Vec<u8>,
}

impl InitiatedAuth {
    pub fn new(previous_state: Initiator, local_init_message: Vec<u8>) -> Self {
        Self {
            remote_node_id: previous_state.remote_node_id,
            local_nonce: previous_state.nonce,
            local_ephemeral_key: previous_state.ephemeral_key,
            local_init_message,
        }
    }
}

/// Session secrets of a completed authentication handshake, as consumed by
/// the framing layer.
pub struct Established {
    pub remote_node_id: H512,
    pub(crate) aes_key: H256,
    pub(crate) mac_key: H256,
    pub ingress_mac: Keccak256,
    pub egress_mac: Keccak256,
    pub ingress_aes: Aes256Ctr64BE,
    pub egress_aes: Aes256Ctr64BE,
}

impl Established {
    fn for_receiver(previous_state: ReceivedAuth, init_message: Vec<u8>) -> Self {
        // keccak256(recipient-nonce || initiator-nonce), remote node initiated
        let hashed_nonces = Keccak256::digest(
            [previous_state.local_nonce.0, previous_state.remote_nonce.0].concat(),
        )
        .into();

        Self::new(
            previous_state.remote_node_id,
            init_message,
            previous_state.local_nonce,
            previous_state.local_ephemeral_key,
            hashed_nonces,
            previous_state.remote_init_message,
            previous_state.remote_nonce,
            previous_state.remote_ephemeral_key,
        )
    }

    fn for_initiator(
        previous_state: InitiatedAuth,
        remote_init_message: Vec<u8>,
        remote_nonce: H256,
        remote_ephemeral_key: PublicKey,
    ) -> Self {
        // keccak256(recipient-nonce || initiator-nonce), local node initiated
        let hashed_nonces =
            Keccak256::digest([remote_nonce.0, previous_state.local_nonce.0].concat()).into();

        Self::new(
            previous_state.remote_node_id,
            previous_state.local_init_message,
            previous_state.local_nonce,
            previous_state.local_ephemeral_key,
            hashed_nonces,
            remote_init_message,
            remote_nonce,
            remote_ephemeral_key,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn new(
        remote_node_id: H512,
        local_init_message: Vec<u8>,
        local_nonce: H256,
        local_ephemeral_key: SecretKey,
        hashed_nonces: [u8; 32],
        remote_init_message: Vec<u8>,
        remote_nonce: H256,
        remote_ephemeral_key: PublicKey,
    ) -> Self {
        let ephemeral_key_secret = ecdh_xchng(&local_ephemeral_key, &remote_ephemeral_key);

        // shared-secret = keccak256(ephemeral-key || keccak256(nonce || initiator-nonce))
        let shared_secret =
            Keccak256::digest([ephemeral_key_secret, hashed_nonces].concat()).into();
        // aes-secret = keccak256(ephemeral-key || shared-secret)
        let aes_key =
            H256(Keccak256::digest([ephemeral_key_secret, shared_secret].concat()).into());
        // mac-secret = keccak256(ephemeral-key || aes-secret)
        let mac_key = H256(Keccak256::digest([ephemeral_key_secret, aes_key.0].concat()).into());

        // egress-mac = keccak256.init((mac-secret ^ remote-nonce) || local-init-msg)
        let egress_mac = Keccak256::default()
            .chain_update(mac_key ^ remote_nonce)
            .chain_update(&local_init_message);

        // ingress-mac = keccak256.init((mac-secret ^ local-nonce) || remote-init-msg)
        let ingress_mac = Keccak256::default()
            .chain_update(mac_key ^ local_nonce)
            .chain_update(&remote_init_message);

        let ingress_aes =
            <Aes256Ctr64BE as aes::cipher::KeyIvInit>::new(&aes_key.0.into(), &[0; 16].into());
        let egress_aes = ingress_aes.clone();

        Self {
            remote_node_id,
            aes_key,
            mac_key,
            ingress_mac,
            egress_mac,
            ingress_aes,
            egress_aes,
        }
    }
}
