// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Public-prefix readiness detection.
//!
//! The element chain is entitled to read only the leading
//! `offset_to_private` bytes of the reassembled message. The sooner the
//! contiguous head of the fragment sequence covers that offset, the sooner
//! the chain can run - large messages start forwarding before their last
//! fragment arrives.

use crate::config::PREFIX_FIELD_LEN;
use crate::elements::BufferMode;
use crate::engine::fragment_store::FragmentState;

/// Result of one readiness check after a fragment insertion.
pub enum PrefixCheck {
    /// Gap before the offset, or fragment 0 too short to carry the length
    /// field yet. Keep buffering.
    NotReady,
    Ready(PublicPrefix),
}

/// The extracted public segment plus what the extraction consumed.
pub struct PublicPrefix {
    /// Exactly `offset_to_private` bytes (clamped to the message length).
    pub bytes: Vec<u8>,
    /// Largest sequence index whose bytes were consumed.
    pub last_used_seq: u16,
    /// Unconsumed remainder of the last consumed fragment. Re-joined to the
    /// processed prefix before refragmentation so no private byte that
    /// shares a fragment with the public segment is ever lost.
    pub tail: Vec<u8>,
}

/// Read `offset_to_private` from the head of fragment 0.
///
/// Byte 0 is an opaque version; bytes 1..5 are the u32 LE length of the
/// public segment. Returns `None` while fragment 0 is shorter than that.
pub fn read_offset_to_private(frag0: &[u8]) -> Option<u32> {
    if frag0.len() < PREFIX_FIELD_LEN {
        return None;
    }
    Some(u32::from_le_bytes([frag0[1], frag0[2], frag0[3], frag0[4]]))
}

/// Attempt to extract the public prefix from a fragment state.
///
/// On success the state is marked extracted; the flag never flips back, so
/// later fragment arrivals of the same RPC are merely buffered.
pub fn extract_public_prefix(state: &mut FragmentState, mode: BufferMode) -> PrefixCheck {
    if state.public_segment_extracted {
        return PrefixCheck::NotReady;
    }
    match mode {
        BufferMode::FullBuffering => extract_full(state),
        _ => extract_prefix(state),
    }
}

/// FullBuffering: the "prefix" is the whole message, ready only when every
/// fragment is present.
fn extract_full(state: &mut FragmentState) -> PrefixCheck {
    let total = state.total_packets;
    if total == 0 || state.fragments.len() < total as usize {
        return PrefixCheck::NotReady;
    }

    let size: usize = state.fragments.values().map(Vec::len).sum();
    let mut bytes = Vec::with_capacity(size);
    for seq in 0..total {
        if let Some(frag) = state.fragments.get(&seq) {
            bytes.extend_from_slice(frag);
        }
    }
    state.public_segment_extracted = true;
    PrefixCheck::Ready(PublicPrefix {
        bytes,
        last_used_seq: total - 1,
        tail: Vec::new(),
    })
}

fn extract_prefix(state: &mut FragmentState) -> PrefixCheck {
    let Some(frag0) = state.fragments.get(&0) else {
        return PrefixCheck::NotReady;
    };
    let Some(offset) = read_offset_to_private(frag0) else {
        return PrefixCheck::NotReady;
    };
    let offset = offset as usize;
    let total = state.total_packets;

    // Walk the contiguous head until the offset is covered.
    let mut covered = 0usize;
    let mut last_used_seq = 0u16;
    let mut seq = 0u16;
    loop {
        let Some(frag) = state.fragments.get(&seq) else {
            return PrefixCheck::NotReady;
        };
        covered += frag.len();
        last_used_seq = seq;
        if covered >= offset {
            break;
        }
        if seq + 1 >= total {
            // Whole message is shorter than the declared public segment;
            // clamp rather than leave the RPC stuck until the reaper.
            log::debug!(
                "[prefix] message ends at {} bytes, before offset_to_private {}",
                covered,
                offset
            );
            break;
        }
        seq += 1;
    }

    let take = offset.min(covered);
    let mut bytes = Vec::with_capacity(take);
    let mut remaining = take;
    let mut tail = Vec::new();
    for s in 0..=last_used_seq {
        let Some(frag) = state.fragments.get(&s) else {
            break;
        };
        if remaining >= frag.len() {
            bytes.extend_from_slice(frag);
            remaining -= frag.len();
        } else {
            bytes.extend_from_slice(&frag[..remaining]);
            tail = frag[remaining..].to_vec();
            remaining = 0;
        }
    }

    state.public_segment_extracted = true;
    PrefixCheck::Ready(PublicPrefix {
        bytes,
        last_used_seq,
        tail,
    })
}
