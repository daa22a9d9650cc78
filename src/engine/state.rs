use std::collections::HashSet;

use crate::Amount;
use crate::model::{
    Bucket, EntryId, EntryKind, EntryStatus, LedgerEntry, ProviderId, WalletSnapshot,
};

/// Denormalized wallet balances.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Balances {
    pub available: Amount,
    pub pending: Amount,
    pub escrow: Amount,
    pub total_earned: Amount,
    pub total_withdrawn: Amount,
}

impl Balances {
    pub fn total(&self) -> Amount {
        self.available + self.pending + self.escrow
    }

    fn bucket_mut(&mut self, bucket: Bucket) -> &mut Amount {
        match bucket {
            Bucket::Pending => &mut self.pending,
            Bucket::Available => &mut self.available,
            Bucket::Escrow => &mut self.escrow,
        }
    }
}

/// Per-provider aggregate over the ledger.
///
/// This is a cache: [`Wallet::from_journal`] rebuilds it from the entries at any time.
/// Both `apply` and `settle` remember which entry ids they have seen, so replaying
/// an entry leaves the balances untouched.
#[derive(Debug)]
pub struct Wallet {
    provider: ProviderId,
    balances: Balances,
    applied: HashSet<EntryId>,
    withdrawals: HashSet<EntryId>,
    revision: u64,
}

impl Wallet {
    pub fn new(provider: ProviderId) -> Self {
        Self {
            provider,
            balances: Balances::default(),
            applied: HashSet::new(),
            withdrawals: HashSet::new(),
            revision: 0,
        }
    }

    /// Fold a wallet's entries into a fresh aggregate.
    pub fn from_journal<'a>(
        provider: ProviderId,
        entries: impl IntoIterator<Item = &'a LedgerEntry>,
    ) -> Self {
        let mut wallet = Wallet::new(provider);
        for entry in entries {
            wallet.apply(entry);
            wallet.settle(entry);
        }
        wallet
    }

    /// Post an appended entry to its bucket. Returns `false` if the entry was
    /// already applied or belongs to another wallet.
    pub fn apply(&mut self, entry: &LedgerEntry) -> bool {
        if entry.wallet != self.provider || !self.applied.insert(entry.id) {
            return false;
        }

        *self.balances.bucket_mut(entry.bucket) += entry.amount;
        if entry.kind == EntryKind::Earning
            && entry.bucket == Bucket::Pending
            && entry.amount.is_positive()
        {
            self.balances.total_earned += entry.amount;
        }
        self.revision += 1;
        true
    }

    /// Account for a PAYOUT entry that reached `Completed`. Anything else is ignored.
    pub fn settle(&mut self, entry: &LedgerEntry) -> bool {
        if entry.wallet != self.provider
            || entry.kind != EntryKind::Payout
            || entry.status != EntryStatus::Completed
            || !self.withdrawals.insert(entry.id)
        {
            return false;
        }

        self.balances.total_withdrawn += entry.amount.abs();
        self.revision += 1;
        true
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn balances(&self) -> Balances {
        self.balances
    }

    pub fn available(&self) -> Amount {
        self.balances.available
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn snapshot(&self) -> WalletSnapshot {
        WalletSnapshot {
            provider: self.provider.clone(),
            available: self.balances.available,
            pending: self.balances.pending,
            escrow: self.balances.escrow,
            total_earned: self.balances.total_earned,
            total_withdrawn: self.balances.total_withdrawn,
            revision: self.revision,
        }
    }

    #[cfg(test)]
    pub(crate) fn balances_mut(&mut self) -> &mut Balances {
        &mut self.balances
    }
}
