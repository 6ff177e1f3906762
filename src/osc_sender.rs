use crate::types::*;
use crossbeam_channel::Receiver;
use log::{debug, error, info};
use rosc::{OscMessage, OscPacket, OscType};
use std::net::UdpSocket;

/// Publishes game frames to an external renderer over OSC/UDP.
///
///   /chord/state        i   GameState::code()
///   /chord/segment      i i index, total
///   /chord/name         s   current display name ("" when none)
///   /chord/expected     s   expected gesture
///   /chord/next         s s next display name, next gesture
///   /chord/seen         s f observed gesture, confidence
///   /chord/hold         f   hold progress 0..1
///   /chord/penalty      f   seconds of penalty left (-1 outside FAIL)
///   /chord/score        i i i score, correct, errors
///   /chord/accuracy     f   only once finished
///   /chord/clip         s   audio trigger kind, when one fired
pub struct OscSender {
    rx: Receiver<GameFrame>,
    target: String,
}

impl OscSender {
    pub fn new(rx: Receiver<GameFrame>, target: String) -> Self {
        Self { rx, target }
    }

    /// Run the OSC sender loop. Blocks the calling thread.
    pub fn run(&self) {
        let socket = match UdpSocket::bind("0.0.0.0:0") {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to bind UDP socket: {}", e);
                return;
            }
        };
        info!("OSC sender → {}", self.target);

        for frame in self.rx.iter() {
            for packet in frame_packets(&frame) {
                if let Err(e) = self.send(&socket, &packet) {
                    debug!("OSC send error: {}", e);
                }
            }
        }
        info!("OSC sender shutting down");
    }

    fn send(
        &self,
        socket: &UdpSocket,
        packet: &OscPacket,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let buf = rosc::encoder::encode(packet)?;
        socket.send_to(&buf, &self.target)?;
        Ok(())
    }
}

fn message(addr: &str, args: Vec<OscType>) -> OscPacket {
    OscPacket::Message(OscMessage {
        addr: addr.to_string(),
        args,
    })
}

/// The OSC messages describing one frame.
pub fn frame_packets(frame: &GameFrame) -> Vec<OscPacket> {
    let name = frame
        .segment
        .as_ref()
        .map(|s| s.display_name.clone())
        .unwrap_or_default();
    let expected = frame
        .expected_gesture
        .map(|g| g.as_str())
        .unwrap_or_default();
    let (next_name, next_gesture) = match (&frame.next_segment, frame.next_gesture) {
        (Some(s), Some(g)) => (s.display_name.clone(), g.as_str()),
        _ => (String::new(), ""),
    };

    let mut packets = vec![
        message("/chord/state", vec![OscType::Int(frame.state.code())]),
        message(
            "/chord/segment",
            vec![
                OscType::Int(frame.stats.segment_index as i32),
                OscType::Int(frame.total_segments as i32),
            ],
        ),
        message("/chord/name", vec![OscType::String(name)]),
        message("/chord/expected", vec![OscType::String(expected.into())]),
        message(
            "/chord/next",
            vec![OscType::String(next_name), OscType::String(next_gesture.into())],
        ),
        message(
            "/chord/seen",
            vec![
                OscType::String(frame.observation.gesture.as_str().into()),
                OscType::Float(frame.observation.confidence),
            ],
        ),
        message("/chord/hold", vec![OscType::Float(frame.hold_progress)]),
        message(
            "/chord/penalty",
            vec![OscType::Float(
                frame.penalty_remaining.map(|p| p as f32).unwrap_or(-1.0),
            )],
        ),
        message(
            "/chord/score",
            vec![
                OscType::Int(frame.stats.score as i32),
                OscType::Int(frame.stats.correct_count as i32),
                OscType::Int(frame.stats.error_count as i32),
            ],
        ),
    ];

    if let Some(acc) = frame.accuracy {
        packets.push(message("/chord/accuracy", vec![OscType::Float(acc as f32)]));
    }
    if let Some(trigger) = &frame.audio_trigger {
        packets.push(message(
            "/chord/clip",
            vec![OscType::String(trigger.kind.to_string())],
        ));
    }
    packets
}
