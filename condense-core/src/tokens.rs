//! Token counting and the per-run budget ledger

use crate::config::{BudgetConfig, TokenizerKind};
use crate::CondenseError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tiktoken_rs::CoreBPE;
use tracing::{debug, warn};

/// Fixed divisor of the character heuristic
pub const HEURISTIC_CHARS_PER_TOKEN: usize = 3;

/// Context windows of commonly targeted models
const MODEL_WINDOWS: &[(&str, usize)] = &[
    ("gpt-4o", 128_000),
    ("gpt-4-turbo", 128_000),
    ("gpt-4", 128_000),
    ("gpt-3.5-turbo", 16_385),
    ("claude-3", 200_000),
    ("claude", 200_000),
    ("llama", 32_000),
    ("gemini-1.5-pro", 2_000_000),
    ("gemini", 1_000_000),
];

/// Context window of a known model (longest prefix match)
pub fn model_context_window(model: &str) -> Option<usize> {
    let model = model.to_ascii_lowercase();
    MODEL_WINDOWS
        .iter()
        .find(|(prefix, _)| model.starts_with(prefix))
        .map(|(_, window)| *window)
}

/// Token counter: a BPE encoding when available, else the fixed heuristic
#[derive(Clone)]
pub enum Tokenizer {
    Bpe { encoding: String, bpe: Arc<CoreBPE> },
    Heuristic,
}

impl fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bpe { encoding, .. } => write!(f, "Tokenizer::Bpe({})", encoding),
            Self::Heuristic => f.write_str("Tokenizer::Heuristic"),
        }
    }
}

impl Tokenizer {
    /// Build the counter selected by the profile.
    pub fn from_config(config: &BudgetConfig) -> crate::Result<Self> {
        match config.tokenizer {
            TokenizerKind::Heuristic => Ok(Self::Heuristic),
            TokenizerKind::Tiktoken => Self::bpe_for_model(&config.model).ok_or_else(|| {
                CondenseError::InvalidProfile(format!(
                    "no BPE encoding available for model '{}'",
                    config.model
                ))
            }),
            TokenizerKind::Auto => Ok(Self::bpe_for_model(&config.model).unwrap_or_else(|| {
                warn!(model = %config.model, "BPE encoding unavailable, using character heuristic");
                Self::Heuristic
            })),
        }
    }

    fn bpe_for_model(model: &str) -> Option<Self> {
        if let Ok(bpe) = tiktoken_rs::get_bpe_from_model(model) {
            return Some(Self::Bpe {
                encoding: model.to_string(),
                bpe: Arc::new(bpe),
            });
        }
        debug!(model, "model not known to tiktoken, falling back to cl100k_base");
        tiktoken_rs::cl100k_base().ok().map(|bpe| Self::Bpe {
            encoding: "cl100k_base".to_string(),
            bpe: Arc::new(bpe),
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Bpe { encoding, .. } => encoding,
            Self::Heuristic => "heuristic",
        }
    }

    pub fn is_exact(&self) -> bool {
        matches!(self, Self::Bpe { .. })
    }

    pub fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        match self {
            Self::Bpe { bpe, .. } => bpe.encode_with_special_tokens(text).len(),
            Self::Heuristic => heuristic_count(text),
        }
    }
}

/// ceil(chars / 3)
pub fn heuristic_count(text: &str) -> usize {
    text.chars().count().div_ceil(HEURISTIC_CHARS_PER_TOKEN)
}

/// One per-file grant
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Allocation {
    pub path: String,
    pub requested: usize,
    pub granted: usize,
    pub priority: f64,
    pub truncated: bool,
}

/// Budget ledger: `used + sum(reserved) <= total` always holds.
#[derive(Debug, Clone)]
pub struct TokenBudget {
    total: usize,
    used: usize,
    reserved: BTreeMap<String, usize>,
    allocations: Vec<Allocation>,
}

impl TokenBudget {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            used: 0,
            reserved: BTreeMap::new(),
            allocations: Vec::new(),
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn reserved_total(&self) -> usize {
        self.reserved.values().sum()
    }

    pub fn reserved(&self, label: &str) -> Option<usize> {
        self.reserved.get(label).copied()
    }

    pub fn remaining(&self) -> usize {
        self.total
            .saturating_sub(self.used)
            .saturating_sub(self.reserved_total())
    }

    pub fn allocations(&self) -> &[Allocation] {
        &self.allocations
    }

    /// Hold `tokens` under `label`. Re-reserving a label replaces its hold.
    /// Returns false (and changes nothing) when capacity is insufficient.
    pub fn reserve(&mut self, label: &str, tokens: usize) -> bool {
        let existing = self.reserved.get(label).copied().unwrap_or(0);
        if tokens > self.remaining() + existing {
            return false;
        }
        self.reserved.insert(label.to_string(), tokens);
        true
    }

    /// Convert a reservation into used tokens. Charges `actual`, bounded by
    /// the reservation plus the free capacity. Returns the charged amount.
    pub fn commit(&mut self, label: &str, actual: usize) -> usize {
        self.reserved.remove(label);
        let charged = actual.min(self.remaining());
        self.used += charged;
        charged
    }

    /// Drop a reservation without charging it
    pub fn release(&mut self, label: &str) -> Option<usize> {
        self.reserved.remove(label)
    }

    /// Grant up to `requested` tokens, never more than `remaining()`.
    pub fn allocate(&mut self, path: &str, requested: usize, priority: f64) -> Allocation {
        let remaining = self.remaining();
        let granted = requested.min(remaining);
        self.used += granted;
        let allocation = Allocation {
            path: path.to_string(),
            requested,
            granted,
            priority,
            truncated: requested > remaining,
        };
        self.allocations.push(allocation.clone());
        allocation
    }

    /// Shrink the latest allocation to what its content actually used.
    /// `actual == 0` withdraws it entirely.
    pub fn settle_last(&mut self, actual: usize, truncated: bool) {
        let Some(last) = self.allocations.last_mut() else {
            return;
        };
        let refund = last.granted.saturating_sub(actual);
        self.used -= refund;
        if actual == 0 {
            self.allocations.pop();
        } else {
            last.granted -= refund;
            last.truncated = truncated;
        }
    }

    /// The ledger invariant
    pub fn is_consistent(&self) -> bool {
        self.used + self.reserved_total() <= self.total
    }
}

/// Serializable snapshot of the ledger
#[derive(Debug, Clone, Serialize)]
pub struct BudgetStatistics {
    pub tokenizer: String,
    pub total: usize,
    pub used: usize,
    pub reserved: BTreeMap<String, usize>,
    pub remaining: usize,
    pub utilization: f64,
    pub files_processed: usize,
    pub files_truncated: usize,
    pub allocations: Vec<Allocation>,
}

/// Tokenizer plus ledger for one run
#[derive(Debug, Clone)]
pub struct TokenBudgetManager {
    tokenizer: Tokenizer,
    budget: TokenBudget,
}

impl TokenBudgetManager {
    pub fn new(tokenizer: Tokenizer, total: usize) -> Self {
        Self {
            tokenizer,
            budget: TokenBudget::new(total),
        }
    }

    pub fn from_config(config: &BudgetConfig) -> crate::Result<Self> {
        let tokenizer = Tokenizer::from_config(config)?;
        if let Some(window) = model_context_window(&config.model) {
            if config.total > window {
                warn!(
                    model = %config.model,
                    budget = config.total,
                    window,
                    "token budget exceeds the model's context window"
                );
            }
        }
        Ok(Self::new(tokenizer, config.total))
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    pub fn budget(&self) -> &TokenBudget {
        &self.budget
    }

    pub fn count(&self, text: &str) -> usize {
        self.tokenizer.count(text)
    }

    pub fn remaining(&self) -> usize {
        self.budget.remaining()
    }

    pub fn reserve(&mut self, label: &str, tokens: usize) -> bool {
        let ok = self.budget.reserve(label, tokens);
        if !ok {
            debug!(label, tokens, remaining = self.budget.remaining(), "reservation refused");
        }
        ok
    }

    pub fn commit(&mut self, label: &str, actual: usize) -> usize {
        self.budget.commit(label, actual)
    }

    pub fn release(&mut self, label: &str) -> Option<usize> {
        self.budget.release(label)
    }

    pub fn allocate(&mut self, path: &str, requested: usize, priority: f64) -> Allocation {
        self.budget.allocate(path, requested, priority)
    }

    pub fn settle_last(&mut self, actual: usize, truncated: bool) {
        self.budget.settle_last(actual, truncated)
    }

    pub fn statistics(&self) -> BudgetStatistics {
        let budget = &self.budget;
        let utilization = if budget.total == 0 {
            0.0
        } else {
            budget.used as f64 / budget.total as f64
        };
        BudgetStatistics {
            tokenizer: self.tokenizer.name().to_string(),
            total: budget.total,
            used: budget.used,
            reserved: budget.reserved.clone(),
            remaining: budget.remaining(),
            utilization,
            files_processed: budget.allocations.len(),
            files_truncated: budget.allocations.iter().filter(|a| a.truncated).count(),
            allocations: budget.allocations.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heuristic_is_fixed_divisor() {
        let t = Tokenizer::Heuristic;
        assert_eq!(t.count(""), 0);
        assert_eq!(t.count("abc"), 1);
        assert_eq!(t.count("abcd"), 2);
        assert_eq!(t.count(&"x".repeat(300)), 100);
        // chars, not bytes
        assert_eq!(t.count("ééé"), 1);
    }

    #[test]
    fn test_reserve_fails_without_capacity() {
        let mut budget = TokenBudget::new(100);
        assert!(budget.reserve("header", 60));
        assert!(!budget.reserve("manifest", 50));
        assert_eq!(budget.remaining(), 40);
        // Re-reserving replaces the previous hold
        assert!(budget.reserve("header", 90));
        assert_eq!(budget.remaining(), 10);
        assert!(budget.is_consistent());
    }

    #[test]
    fn test_allocate_grants_at_most_remaining() {
        let mut budget = TokenBudget::new(100);
        budget.reserve("header", 30);

        let a = budget.allocate("a.py", 50, 0.9);
        assert_eq!(a.granted, 50);
        assert!(!a.truncated);

        let b = budget.allocate("b.py", 50, 0.5);
        assert_eq!(b.granted, 20);
        assert!(b.truncated);
        assert_eq!(budget.remaining(), 0);
        assert!(budget.is_consistent());

        let c = budget.allocate("c.py", 10, 0.1);
        assert_eq!(c.granted, 0);
        assert_eq!(budget.allocations().len(), 3);
    }

    #[test]
    fn test_commit_converts_reservation() {
        let mut budget = TokenBudget::new(100);
        budget.reserve("manifest", 40);
        let charged = budget.commit("manifest", 25);
        assert_eq!(charged, 25);
        assert_eq!(budget.used(), 25);
        assert_eq!(budget.reserved("manifest"), None);
        assert_eq!(budget.remaining(), 75);

        // Overdraw is clamped to the free capacity
        budget.reserve("footer", 10);
        let charged = budget.commit("footer", 500);
        assert_eq!(charged, 75);
        assert!(budget.is_consistent());
    }

    #[test]
    fn test_settle_last_refunds_unused() {
        let mut budget = TokenBudget::new(100);
        budget.allocate("a.py", 60, 0.9);
        budget.settle_last(45, true);
        assert_eq!(budget.used(), 45);
        assert_eq!(budget.allocations()[0].granted, 45);
        assert!(budget.allocations()[0].truncated);

        budget.allocate("b.py", 30, 0.5);
        budget.settle_last(0, false);
        assert_eq!(budget.used(), 45);
        assert_eq!(budget.allocations().len(), 1);
    }

    #[test]
    fn test_release_frees_capacity() {
        let mut budget = TokenBudget::new(50);
        budget.reserve("tree", 20);
        assert_eq!(budget.release("tree"), Some(20));
        assert_eq!(budget.remaining(), 50);
        assert_eq!(budget.release("tree"), None);
    }

    #[test]
    fn test_statistics_snapshot() {
        let mut manager = TokenBudgetManager::new(Tokenizer::Heuristic, 1000);
        manager.allocate("a", 100, 1.0);
        manager.allocate("b", 2000, 0.5);
        let stats = manager.statistics();
        assert_eq!(stats.tokenizer, "heuristic");
        assert_eq!(stats.files_processed, 2);
        assert_eq!(stats.files_truncated, 1);
        assert_eq!(stats.used, 1000);
        assert!((stats.utilization - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_model_windows() {
        assert_eq!(model_context_window("gpt-4o-mini"), Some(128_000));
        assert_eq!(model_context_window("gpt-3.5-turbo"), Some(16_385));
        assert_eq!(model_context_window("claude-3-opus"), Some(200_000));
        assert_eq!(model_context_window("mystery"), None);
    }

    #[test]
    fn test_heuristic_config() {
        let config = BudgetConfig {
            tokenizer: TokenizerKind::Heuristic,
            ..BudgetConfig::default()
        };
        let manager = TokenBudgetManager::from_config(&config).unwrap();
        assert!(!manager.tokenizer().is_exact());
        assert_eq!(manager.count("abcdef"), 2);
    }
}
