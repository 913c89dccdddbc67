// Sliding tape of per-block outcomes for one validator.
//
// The tape is a fixed ring of 512 slots where slot i holds the outcome
// of height h iff h % 512 == i. Attribution for a block is only final
// once the next block arrives, since the precommits for height h are
// carried in the last_commit of height h+1.

use std::collections::BTreeMap;

use vigil_common::{
    api::{
        dashboard::BlockOutcome,
        tendermint::{Block, CommitSig, Vote},
    },
    config::BLOCKS_TO_TRACK,
};

// Vote evidence is pruned this many heights behind the tip; votes may
// interleave across adjacent heights but not further back
const VOTE_WINDOW: u64 = 3;

#[derive(Debug, Clone)]
pub struct BlockTape {
    slots: Vec<BlockOutcome>,
    last_height: u64,
    // Snapshot restored from disk, aligned on the first live block
    restored: Option<Vec<BlockOutcome>>,
    pub consecutive_missed: u32,
    pub consecutive_empty: u32,
    pub total_signed: u64,
    pub total_proposed: u64,
    pub total_proposed_empty: u64,
    pub prevote_misses: u64,
    pub precommit_misses: u64,
}

impl Default for BlockTape {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockTape {
    pub fn new() -> Self {
        Self {
            slots: vec![BlockOutcome::NoData; BLOCKS_TO_TRACK],
            last_height: 0,
            restored: None,
            consecutive_missed: 0,
            consecutive_empty: 0,
            total_signed: 0,
            total_proposed: 0,
            total_proposed_empty: 0,
            prevote_misses: 0,
            precommit_misses: 0,
        }
    }

    pub fn last_height(&self) -> u64 {
        self.last_height
    }

    // Record a finalized outcome for the given height
    pub fn record(&mut self, height: u64, outcome: BlockOutcome) {
        if height == 0 || (self.last_height != 0 && height <= self.last_height) {
            return;
        }

        if let Some(restored) = self.restored.take() {
            self.align_restored(height, restored);
        } else if self.last_height != 0 && height > self.last_height + 1 {
            // gap without an explicit resync, blank it the same way
            self.blank_range(self.last_height + 1, height - 1);
        }

        self.slots[(height % BLOCKS_TO_TRACK as u64) as usize] = outcome;
        self.last_height = height;

        match outcome {
            BlockOutcome::Missed | BlockOutcome::MissedPrevote | BlockOutcome::MissedPrecommit => {
                self.consecutive_missed += 1;
                match outcome {
                    BlockOutcome::MissedPrevote => self.prevote_misses += 1,
                    BlockOutcome::MissedPrecommit => self.precommit_misses += 1,
                    _ => {}
                }
            }
            BlockOutcome::Signed => {
                self.consecutive_missed = 0;
                self.total_signed += 1;
            }
            BlockOutcome::Proposed => {
                self.consecutive_missed = 0;
                self.consecutive_empty = 0;
                self.total_proposed += 1;
            }
            BlockOutcome::EmptyProposed => {
                self.consecutive_missed = 0;
                self.consecutive_empty += 1;
                self.total_proposed += 1;
                self.total_proposed_empty += 1;
            }
            BlockOutcome::NoData => {}
        }
    }

    // A reconnect landed on `height`; everything between the last
    // known block and the new tip is unknowable
    pub fn resync(&mut self, height: u64) {
        if self.last_height == 0 || height <= self.last_height + 1 {
            return;
        }
        self.blank_range(self.last_height + 1, height - 1);
        self.last_height = height - 1;
    }

    fn blank_range(&mut self, from: u64, to: u64) {
        // more than a full revolution blanks everything
        let from = from.max(to.saturating_sub(BLOCKS_TO_TRACK as u64 - 1));
        for h in from..=to {
            self.slots[(h % BLOCKS_TO_TRACK as u64) as usize] = BlockOutcome::NoData;
        }
    }

    // Ordered view, oldest slot first, newest last
    pub fn snapshot(&self) -> Vec<BlockOutcome> {
        if self.last_height == 0 {
            if let Some(restored) = &self.restored {
                let mut out = vec![BlockOutcome::NoData; BLOCKS_TO_TRACK - restored.len()];
                out.extend_from_slice(restored);
                return out;
            }
            return self.slots.clone();
        }
        let mut out = Vec::with_capacity(BLOCKS_TO_TRACK);
        let start = self.last_height.saturating_sub(BLOCKS_TO_TRACK as u64 - 1);
        for h in start..=self.last_height {
            if h == 0 {
                continue;
            }
            out.push(self.slots[(h % BLOCKS_TO_TRACK as u64) as usize]);
        }
        while out.len() < BLOCKS_TO_TRACK {
            out.insert(0, BlockOutcome::NoData);
        }
        out
    }

    // Restore a persisted snapshot; heights are unknown until the
    // first live block aligns it
    pub fn restore(&mut self, outcomes: Vec<BlockOutcome>) {
        if self.last_height != 0 || outcomes.is_empty() {
            return;
        }
        let mut outcomes = outcomes;
        if outcomes.len() > BLOCKS_TO_TRACK {
            outcomes.drain(..outcomes.len() - BLOCKS_TO_TRACK);
        }
        // trailing misses stay armed across a restart
        self.consecutive_missed = outcomes
            .iter()
            .rev()
            .take_while(|outcome| outcome.is_miss())
            .count() as u32;
        self.consecutive_empty = outcomes
            .iter()
            .rev()
            .take_while(|outcome| **outcome == BlockOutcome::EmptyProposed)
            .count() as u32;
        self.restored = Some(outcomes);
    }

    // Assume the last restored outcome was the block right before the
    // first live one
    fn align_restored(&mut self, first_live: u64, restored: Vec<BlockOutcome>) {
        let count = restored.len() as u64;
        if first_live <= 1 {
            return;
        }
        let first_height = first_live.saturating_sub(count).max(1);
        for (i, outcome) in restored
            .into_iter()
            .skip((count - (first_live - first_height)) as usize)
            .enumerate()
        {
            let h = first_height + i as u64;
            self.slots[(h % BLOCKS_TO_TRACK as u64) as usize] = outcome;
        }
        self.last_height = first_live - 1;
    }
}

// Pending evidence for not-yet-final blocks
#[derive(Debug, Default, Clone, Copy)]
struct VoteEvidence {
    our_prevote: bool,
    our_precommit: bool,
    // any vote seen at this height, ours or not
    any: bool,
}

#[derive(Debug, Clone)]
struct PendingBlock {
    height: u64,
    proposed_by_us: bool,
    has_tx: bool,
}

// Turns the NewBlock/Vote stream into finalized per-height outcomes
// for the monitored validator
#[derive(Debug)]
pub struct Attributor {
    // upper-case hex of our 20-byte consensus address
    cons_hex: String,
    pending: Option<PendingBlock>,
    votes: BTreeMap<u64, VoteEvidence>,
}

impl Attributor {
    pub fn new(cons_address: &[u8]) -> Self {
        Self {
            cons_hex: hex::encode_upper(cons_address),
            pending: None,
            votes: BTreeMap::new(),
        }
    }

    // Update the consensus address when the validator rotates keys
    pub fn set_cons_address(&mut self, cons_address: &[u8]) {
        self.cons_hex = hex::encode_upper(cons_address);
    }

    pub fn on_vote(&mut self, vote: &Vote) {
        let Some(height) = vote.height.parse::<u64>().ok() else {
            return;
        };
        let evidence = self.votes.entry(height).or_default();
        evidence.any = true;
        if vote.validator_address.eq_ignore_ascii_case(&self.cons_hex) {
            if vote.is_prevote() {
                evidence.our_prevote = true;
            } else if vote.is_precommit() {
                evidence.our_precommit = true;
            }
        }
    }

    // Returns the outcome finalized by this block, i.e. the outcome of
    // the previous height whose precommits this block carries
    pub fn on_new_block(&mut self, block: &Block) -> Option<(u64, BlockOutcome)> {
        let height = block.header.height.parse::<u64>().ok()?;
        let finalized = match self.pending.take() {
            // only a direct successor finalizes the pending block, a
            // gap means the commit we carry is for someone else
            Some(pending) if pending.height + 1 == height => {
                let commit_sigs = block
                    .last_commit
                    .as_ref()
                    .map(|commit| commit.signatures.as_slice())
                    .unwrap_or(&[]);
                Some((pending.height, self.attribute(&pending, commit_sigs)))
            }
            _ => None,
        };

        self.pending = Some(PendingBlock {
            height,
            proposed_by_us: block
                .header
                .proposer_address
                .eq_ignore_ascii_case(&self.cons_hex),
            has_tx: !block.data.txs.is_empty(),
        });

        // drop vote evidence that can no longer matter
        let cutoff = height.saturating_sub(VOTE_WINDOW);
        self.votes.retain(|h, _| *h >= cutoff);

        finalized
    }

    // The subscriber reconnected; any pending block can no longer be
    // finalized
    pub fn on_resync(&mut self) {
        self.pending = None;
        self.votes.clear();
    }

    fn attribute(&self, pending: &PendingBlock, commit_sigs: &[CommitSig]) -> BlockOutcome {
        if pending.proposed_by_us {
            return if pending.has_tx {
                BlockOutcome::Proposed
            } else {
                BlockOutcome::EmptyProposed
            };
        }

        let committed = commit_sigs.iter().any(|sig| {
            sig.is_commit() && sig.validator_address.eq_ignore_ascii_case(&self.cons_hex)
        });
        if committed {
            return BlockOutcome::Signed;
        }

        match self.votes.get(&pending.height) {
            Some(evidence) if evidence.our_prevote || evidence.our_precommit => {
                BlockOutcome::MissedPrecommit
            }
            Some(evidence) if evidence.any => BlockOutcome::MissedPrevote,
            _ => BlockOutcome::Missed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_common::api::tendermint::{
        BlockData, Commit, Header, BLOCK_ID_FLAG_ABSENT, BLOCK_ID_FLAG_COMMIT,
        SIGNED_MSG_TYPE_PRECOMMIT, SIGNED_MSG_TYPE_PREVOTE,
    };

    const US: [u8; 20] = [0xaa; 20];
    const THEM: [u8; 20] = [0xbb; 20];

    fn make_block(height: u64, proposer: &[u8], txs: usize, committers: &[&[u8]]) -> Block {
        let mut signatures: Vec<CommitSig> = committers
            .iter()
            .map(|addr| CommitSig {
                block_id_flag: BLOCK_ID_FLAG_COMMIT,
                validator_address: hex::encode_upper(addr),
                signature: Some("c2ln".to_string()),
            })
            .collect();
        signatures.push(CommitSig {
            block_id_flag: BLOCK_ID_FLAG_ABSENT,
            validator_address: String::new(),
            signature: None,
        });
        Block {
            header: Header {
                chain_id: "test-1".to_string(),
                height: height.to_string(),
                time: String::new(),
                proposer_address: hex::encode_upper(proposer),
            },
            data: BlockData {
                txs: vec!["dA==".to_string(); txs],
            },
            last_commit: Some(Commit {
                height: (height - 1).to_string(),
                signatures,
            }),
        }
    }

    fn vote(height: u64, addr: &[u8], vote_type: u8) -> Vote {
        Vote {
            vote_type,
            height: height.to_string(),
            validator_address: hex::encode_upper(addr),
        }
    }

    #[test]
    fn test_tape_length_is_stable() {
        let mut tape = BlockTape::new();
        assert_eq!(tape.snapshot().len(), BLOCKS_TO_TRACK);
        for h in 1..2000u64 {
            tape.record(h, BlockOutcome::Signed);
        }
        assert_eq!(tape.snapshot().len(), BLOCKS_TO_TRACK);
    }

    #[test]
    fn test_consecutive_missed_resets_on_participation() {
        let mut tape = BlockTape::new();
        tape.record(1, BlockOutcome::Missed);
        tape.record(2, BlockOutcome::MissedPrevote);
        tape.record(3, BlockOutcome::MissedPrecommit);
        assert_eq!(tape.consecutive_missed, 3);
        assert_eq!(tape.prevote_misses, 1);
        assert_eq!(tape.precommit_misses, 1);

        tape.record(4, BlockOutcome::Signed);
        assert_eq!(tape.consecutive_missed, 0);

        tape.record(5, BlockOutcome::Missed);
        tape.record(6, BlockOutcome::Proposed);
        assert_eq!(tape.consecutive_missed, 0);
        tape.record(7, BlockOutcome::Missed);
        tape.record(8, BlockOutcome::EmptyProposed);
        assert_eq!(tape.consecutive_missed, 0);
    }

    #[test]
    fn test_consecutive_empty_only_resets_on_full_proposal() {
        let mut tape = BlockTape::new();
        tape.record(1, BlockOutcome::EmptyProposed);
        tape.record(2, BlockOutcome::EmptyProposed);
        assert_eq!(tape.consecutive_empty, 2);
        // signed blocks leave the counter untouched
        tape.record(3, BlockOutcome::Signed);
        assert_eq!(tape.consecutive_empty, 2);
        tape.record(4, BlockOutcome::Proposed);
        assert_eq!(tape.consecutive_empty, 0);
        assert_eq!(tape.total_proposed, 3);
        assert_eq!(tape.total_proposed_empty, 2);
    }

    #[test]
    fn test_resync_blanks_the_gap() {
        let mut tape = BlockTape::new();
        for h in 1..=10u64 {
            tape.record(h, BlockOutcome::Signed);
        }
        tape.resync(20);
        tape.record(20, BlockOutcome::Signed);

        let snapshot = tape.snapshot();
        // heights 11..=19 are NoData
        for h in 11..=19u64 {
            let idx = snapshot.len() - 1 - (20 - h) as usize;
            assert_eq!(snapshot[idx], BlockOutcome::NoData, "height {}", h);
        }
        assert_eq!(snapshot[snapshot.len() - 1], BlockOutcome::Signed);
    }

    #[test]
    fn test_attribution_signed_and_missed() {
        let mut attributor = Attributor::new(&US);

        assert!(attributor
            .on_new_block(&make_block(10, &THEM, 1, &[&US, &THEM]))
            .is_none());

        // block 11 carries the precommits of height 10
        let (height, outcome) = attributor
            .on_new_block(&make_block(11, &THEM, 1, &[&US, &THEM]))
            .unwrap();
        assert_eq!(height, 10);
        assert_eq!(outcome, BlockOutcome::Signed);

        // no signature from us and no vote data at all
        let (height, outcome) = attributor
            .on_new_block(&make_block(12, &THEM, 1, &[&THEM]))
            .unwrap();
        assert_eq!(height, 11);
        assert_eq!(outcome, BlockOutcome::Missed);
    }

    #[test]
    fn test_attribution_proposer() {
        let mut attributor = Attributor::new(&US);
        attributor.on_new_block(&make_block(10, &US, 2, &[&THEM]));
        let (_, outcome) = attributor
            .on_new_block(&make_block(11, &THEM, 1, &[&THEM]))
            .unwrap();
        assert_eq!(outcome, BlockOutcome::Proposed);

        attributor.on_new_block(&make_block(12, &US, 0, &[&THEM]));
        let (_, outcome) = attributor
            .on_new_block(&make_block(13, &THEM, 1, &[&THEM]))
            .unwrap();
        assert_eq!(outcome, BlockOutcome::EmptyProposed);
    }

    #[test]
    fn test_attribution_vote_evidence() {
        let mut attributor = Attributor::new(&US);
        attributor.on_new_block(&make_block(10, &THEM, 1, &[&THEM]));

        // we prevoted but our precommit never landed
        attributor.on_vote(&vote(10, &US, SIGNED_MSG_TYPE_PREVOTE));
        let (_, outcome) = attributor
            .on_new_block(&make_block(11, &THEM, 1, &[&THEM]))
            .unwrap();
        assert_eq!(outcome, BlockOutcome::MissedPrecommit);

        // other validators voted at 11, we did not
        attributor.on_vote(&vote(11, &THEM, SIGNED_MSG_TYPE_PREVOTE));
        attributor.on_vote(&vote(11, &THEM, SIGNED_MSG_TYPE_PRECOMMIT));
        let (_, outcome) = attributor
            .on_new_block(&make_block(12, &THEM, 1, &[&THEM]))
            .unwrap();
        assert_eq!(outcome, BlockOutcome::MissedPrevote);
    }

    #[test]
    fn test_attribution_gap_discards_pending() {
        let mut attributor = Attributor::new(&US);
        attributor.on_new_block(&make_block(10, &THEM, 1, &[&US]));
        // jumped from 10 to 15: the commit in 15 is not for 10
        assert!(attributor
            .on_new_block(&make_block(15, &THEM, 1, &[&US]))
            .is_none());
        // 16 finalizes 15 normally
        assert!(attributor
            .on_new_block(&make_block(16, &THEM, 1, &[&US]))
            .is_some());
    }

    #[test]
    fn test_restore_rearms_counters_and_aligns() {
        let mut tape = BlockTape::new();
        tape.restore(vec![
            BlockOutcome::Signed,
            BlockOutcome::Missed,
            BlockOutcome::Missed,
        ]);
        assert_eq!(tape.consecutive_missed, 2);

        tape.record(100, BlockOutcome::Missed);
        assert_eq!(tape.consecutive_missed, 3);
        let snapshot = tape.snapshot();
        let n = snapshot.len();
        assert_eq!(snapshot[n - 1], BlockOutcome::Missed);
        assert_eq!(snapshot[n - 2], BlockOutcome::Missed);
        assert_eq!(snapshot[n - 3], BlockOutcome::Missed);
        assert_eq!(snapshot[n - 4], BlockOutcome::Signed);
    }
}
