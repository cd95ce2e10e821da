//! Integration tests for the SYN / SYNACK / ACK exchange.
//!
//! Both roles run in-process; messages are handed across as byte arrays so
//! tests can corrupt them in flight.

use ed25519_dalek::{Signer, SigningKey};
use ocapn_noise::{
    as_initiator, as_responder, Established, HandshakeConfig, HandshakeError,
    InitiatorAwaitingSynack, ResponderAwaitingAck, SupportedEncodings, ACK_LENGTH,
    MAX_PLAINTEXT_LENGTH, NOISE_PATTERN, SYNACK_LENGTH, SYN_LENGTH,
};
use rand::rngs::OsRng;
use snow::Builder;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn start(
    initiator_encodings: Vec<u32>,
    responder_encodings: Vec<u32>,
) -> (InitiatorAwaitingSynack, ResponderAwaitingAck, [u8; SYNACK_LENGTH]) {
    let initiator = as_initiator(HandshakeConfig::with_encodings(initiator_encodings)).unwrap();
    let responder = as_responder(HandshakeConfig::with_encodings(responder_encodings)).unwrap();

    let mut syn = [0u8; SYN_LENGTH];
    let initiator = initiator.write_syn(&mut syn).unwrap();
    let mut synack = [0u8; SYNACK_LENGTH];
    let responder = responder.read_syn_write_synack(&syn, &mut synack).unwrap();
    (initiator, responder, synack)
}

fn establish() -> (Established, Established) {
    let (initiator, responder, synack) = start(vec![0], vec![0]);
    let mut ack = [0u8; ACK_LENGTH];
    let alice = initiator.read_synack_write_ack(&synack, &mut ack).unwrap();
    let bob = responder.read_ack(&ack).unwrap();
    (alice, bob)
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[test]
fn test_handshake_authenticates_both_sides() {
    let initiator = as_initiator(HandshakeConfig::default()).unwrap();
    let responder = as_responder(HandshakeConfig::default()).unwrap();
    let initiator_key = initiator.verifying_key();
    let responder_key = responder.verifying_key();

    let mut syn = [0u8; SYN_LENGTH];
    let initiator = initiator.write_syn(&mut syn).unwrap();
    let mut synack = [0u8; SYNACK_LENGTH];
    let responder = responder.read_syn_write_synack(&syn, &mut synack).unwrap();
    let mut ack = [0u8; ACK_LENGTH];
    let alice = initiator.read_synack_write_ack(&synack, &mut ack).unwrap();
    let bob = responder.read_ack(&ack).unwrap();

    assert_eq!(alice.peer_verifying_key(), &responder_key);
    assert_eq!(bob.peer_verifying_key(), &initiator_key);
}

#[test]
fn test_both_sides_agree_on_highest_shared_encoding() {
    let (initiator, responder, synack) = start(vec![1, 2, 3], vec![2, 3, 5]);
    assert_eq!(responder.encoding(), 3);
    let mut ack = [0u8; ACK_LENGTH];
    let alice = initiator.read_synack_write_ack(&synack, &mut ack).unwrap();
    let bob = responder.read_ack(&ack).unwrap();
    assert_eq!(alice.encoding(), 3);
    assert_eq!(bob.encoding(), 3);
}

#[test]
fn test_round_trip_in_both_directions() {
    let (mut alice, mut bob) = establish();

    let hello = alice.encrypt(b"hello bob").unwrap();
    assert_eq!(hello.len(), 9 + 16);
    assert_eq!(bob.decrypt(&hello).unwrap(), b"hello bob");

    let largest = vec![0x5a; MAX_PLAINTEXT_LENGTH];
    let sealed = bob.encrypt(&largest).unwrap();
    assert_eq!(sealed.len(), 65535);
    assert_eq!(alice.decrypt(&sealed).unwrap(), largest);

    let empty = alice.encrypt(&[]).unwrap();
    assert_eq!(bob.decrypt(&empty).unwrap(), Vec::<u8>::new());
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[test]
fn test_disjoint_encodings_name_both_sets() {
    let initiator = as_initiator(HandshakeConfig::with_encodings(vec![1, 2])).unwrap();
    let responder = as_responder(HandshakeConfig::with_encodings(vec![3, 4])).unwrap();
    let mut syn = [0u8; SYN_LENGTH];
    let _initiator = initiator.write_syn(&mut syn).unwrap();
    let mut synack = [0u8; SYNACK_LENGTH];
    let err = responder
        .read_syn_write_synack(&syn, &mut synack)
        .err()
        .unwrap();
    assert_eq!(
        err.to_string(),
        "OCapN Noise Protocol no mutually supported encoding versions. Responder supports 3, 4; initiator supports 2, 1"
    );
}

#[test]
fn test_corrupt_synack_byte_fails_initiator() {
    for index in [0, 31, 32, 79, 80, 112, SYNACK_LENGTH - 1] {
        let (initiator, _responder, mut synack) = start(vec![0], vec![0]);
        synack[index] ^= 0x01;
        let mut ack = [0u8; ACK_LENGTH];
        let err = initiator
            .read_synack_write_ack(&synack, &mut ack)
            .err()
            .unwrap();
        assert_eq!(err, HandshakeError::SynackUnreadable, "byte {index}");
    }
}

#[test]
fn test_corrupt_ack_byte_fails_responder() {
    for index in [0, 20, 47, 48, ACK_LENGTH - 1] {
        let (initiator, responder, synack) = start(vec![0], vec![0]);
        let mut ack = [0u8; ACK_LENGTH];
        let _alice = initiator.read_synack_write_ack(&synack, &mut ack).unwrap();
        ack[index] ^= 0x80;
        let err = responder.read_ack(&ack).err().unwrap();
        assert_eq!(
            err.to_string(),
            "OCapN Noise Protocol responder cannot read initiator's ACK message",
            "byte {index}"
        );
    }
}

#[test]
fn test_tampered_syn_signature_fails_initiator_at_synack() {
    let initiator = as_initiator(HandshakeConfig::default()).unwrap();
    let responder = as_responder(HandshakeConfig::default()).unwrap();
    let mut syn = [0u8; SYN_LENGTH];
    let initiator = initiator.write_syn(&mut syn).unwrap();
    // first byte of the signature's R component
    syn[32 + 32] ^= 0x01;

    // The responder cannot tell yet; the handshake hash now differs.
    let mut synack = [0u8; SYNACK_LENGTH];
    let _responder = responder.read_syn_write_synack(&syn, &mut synack).unwrap();
    let mut ack = [0u8; ACK_LENGTH];
    assert_eq!(
        initiator.read_synack_write_ack(&synack, &mut ack).err(),
        Some(HandshakeError::SynackUnreadable)
    );
}

#[test]
fn test_signature_from_other_key_fails_at_ack() {
    // A hand-built initiator that claims one identity but signs its static
    // key with another. The SYN is well formed, so only the ACK check catches it.
    let claimed = SigningKey::generate(&mut OsRng);
    let signer = SigningKey::generate(&mut OsRng);

    let builder = Builder::new(NOISE_PATTERN.parse().unwrap());
    let keypair = builder.generate_keypair().unwrap();
    let mut noise = builder
        .local_private_key(&keypair.private)
        .build_initiator()
        .unwrap();

    let mut payload = Vec::new();
    payload.extend_from_slice(claimed.verifying_key().as_bytes());
    payload.extend_from_slice(&signer.sign(&keypair.public).to_bytes());
    payload.extend_from_slice(&SupportedEncodings::new(&[0]).unwrap().encode());
    let mut scratch = [0u8; SYN_LENGTH + 16];
    let written = noise.write_message(&payload, &mut scratch).unwrap();
    assert_eq!(written, SYN_LENGTH);

    let responder = as_responder(HandshakeConfig::default()).unwrap();
    let mut synack = [0u8; SYNACK_LENGTH];
    let responder = responder
        .read_syn_write_synack(&scratch[..SYN_LENGTH], &mut synack)
        .unwrap();
    assert_eq!(responder.initiator_verifying_key(), &claimed.verifying_key());

    let mut reply = [0u8; SYNACK_LENGTH];
    noise.read_message(&synack, &mut reply).unwrap();
    let mut ack = [0u8; ACK_LENGTH + 16];
    let written = noise.write_message(&[], &mut ack).unwrap();
    assert_eq!(written, ACK_LENGTH);

    assert_eq!(
        responder.read_ack(&ack[..ACK_LENGTH]).err(),
        Some(HandshakeError::InitiatorSignatureMismatch)
    );
}

#[test]
fn test_malformed_initiator_signature_is_unreadable() {
    let initiator = as_initiator(HandshakeConfig::default()).unwrap();
    let responder = as_responder(HandshakeConfig::default()).unwrap();
    let mut syn = [0u8; SYN_LENGTH];
    let _initiator = initiator.write_syn(&mut syn).unwrap();
    // top bits of the signature scalar
    syn[32 + 32 + 63] |= 0xe0;

    let mut synack = [0u8; SYNACK_LENGTH];
    assert_eq!(
        responder.read_syn_write_synack(&syn, &mut synack).err(),
        Some(HandshakeError::InitiatorSignatureUnreadable)
    );
}

#[test]
fn test_wrong_length_messages_are_unreadable() {
    let (initiator, _responder, synack) = start(vec![0], vec![0]);
    let mut ack = [0u8; ACK_LENGTH];
    assert_eq!(
        initiator
            .read_synack_write_ack(&synack[..SYNACK_LENGTH - 1], &mut ack)
            .err(),
        Some(HandshakeError::SynackUnreadable)
    );

    let (initiator, responder, synack) = start(vec![0], vec![0]);
    let _alice = initiator.read_synack_write_ack(&synack, &mut ack).unwrap();
    let mut longer = ack.to_vec();
    longer.push(0);
    assert_eq!(
        responder.read_ack(&longer).err(),
        Some(HandshakeError::AckUnreadable)
    );
}

#[test]
fn test_encrypt_rejects_oversized_message() {
    let (mut alice, _bob) = establish();
    let err = alice.encrypt(&vec![0u8; MAX_PLAINTEXT_LENGTH + 1]).unwrap_err();
    assert_eq!(
        err.to_string(),
        "OCapN Noise Protocol message exceeds maximum length for encryption"
    );
}

#[test]
fn test_decrypt_rejects_out_of_range_lengths() {
    let (_alice, mut bob) = establish();
    assert_eq!(
        bob.decrypt(&[0u8; 15]).unwrap_err(),
        HandshakeError::MessageTooShortForDecryption
    );
    assert_eq!(
        bob.decrypt(&vec![0u8; 65536]).unwrap_err(),
        HandshakeError::MessageTooLongForDecryption
    );
}

#[test]
fn test_tampered_ciphertext_fails_distinctly() {
    let (mut alice, mut bob) = establish();
    let mut sealed = alice.encrypt(b"capability").unwrap();
    sealed[3] ^= 0x01;
    let err = bob.decrypt(&sealed).unwrap_err();
    assert_eq!(err, HandshakeError::DecryptionFailed);
    assert_eq!(err.to_string(), "OCapN Noise Protocol decryption failed");
}
