//! Local SYN/SYNACK/ACK self-test.

use anyhow::Context;
use ocapn_noise::{
    as_initiator, as_responder, HandshakeConfig, ACK_LENGTH, NOISE_PATTERN, SYNACK_LENGTH,
    SYN_LENGTH,
};
use ocapn_types::ClientConfig;
use tracing::info;

const SAMPLE: &[u8] = b"ocapn handshake sample";

pub fn cmd_handshake(
    config: &ClientConfig,
    initiator_encodings: Vec<u32>,
    responder_encodings: Vec<u32>,
) -> anyhow::Result<()> {
    let pick = |given: Vec<u32>| {
        if given.is_empty() {
            config.supported_encodings.clone()
        } else {
            given
        }
    };
    let initiator_encodings = pick(initiator_encodings);
    let responder_encodings = pick(responder_encodings);

    let initiator = as_initiator(HandshakeConfig::with_encodings(initiator_encodings.clone()))
        .context("Initiator setup failed")?;
    let responder = as_responder(HandshakeConfig::with_encodings(responder_encodings.clone()))
        .context("Responder setup failed")?;
    let initiator_key = initiator.verifying_key();
    let responder_key = responder.verifying_key();

    let mut syn = [0u8; SYN_LENGTH];
    let initiator = initiator.write_syn(&mut syn).context("SYN")?;
    let mut synack = [0u8; SYNACK_LENGTH];
    let responder = responder
        .read_syn_write_synack(&syn, &mut synack)
        .context("SYNACK")?;
    let mut ack = [0u8; ACK_LENGTH];
    let mut initiator = initiator
        .read_synack_write_ack(&synack, &mut ack)
        .context("ACK")?;
    let mut responder = responder.read_ack(&ack).context("ACK")?;
    info!(encoding = initiator.encoding(), "Handshake complete");

    anyhow::ensure!(
        initiator.peer_verifying_key() == &responder_key,
        "initiator authenticated the wrong responder"
    );
    anyhow::ensure!(
        responder.peer_verifying_key() == &initiator_key,
        "responder authenticated the wrong initiator"
    );

    let sealed = initiator.encrypt(SAMPLE).context("Encrypt")?;
    let opened = responder.decrypt(&sealed).context("Decrypt")?;
    anyhow::ensure!(opened == SAMPLE, "sample did not survive the channel");
    let reply = responder.encrypt(&opened).context("Encrypt")?;
    anyhow::ensure!(
        initiator.decrypt(&reply).context("Decrypt")? == SAMPLE,
        "reply did not survive the channel"
    );

    println!("pattern:             {NOISE_PATTERN}");
    println!("initiator offers:    {initiator_encodings:?}");
    println!("responder accepts:   {responder_encodings:?}");
    println!("negotiated encoding: {}", initiator.encoding());
    println!("SYN:                 {SYN_LENGTH} bytes");
    println!("SYNACK:              {SYNACK_LENGTH} bytes");
    println!("ACK:                 {ACK_LENGTH} bytes");
    println!(
        "sample:              {} bytes plaintext, {} bytes sealed",
        SAMPLE.len(),
        sealed.len()
    );
    Ok(())
}
