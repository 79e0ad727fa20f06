//! Credit ledger.
//!
//! Two kinds of account live here:
//! - a credit balance per [`ActorClass`], spent per generated scene
//!   according to [`Pricing`] and topped up by promo codes;
//! - the usage meter, charged with the provider's measured token usage
//!   converted to credit-equivalent units.
//!
//! Every balance mutation is a compare-and-swap on the store, so two
//! concurrent debits can never spend the same credits twice.

use crate::backend::Usage;
use crate::store::{get_json, keys, set_json, KeyValueStore, StoreError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Starting credits for a guest.
pub const INITIAL_CREDITS_GUEST: u64 = 100;

/// Starting credits for a registered user.
pub const INITIAL_CREDITS_REGISTERED: u64 = 250;

/// Starting usage meter, in credit-equivalent units.
pub const INITIAL_USAGE_UNITS: u64 = 2500;

/// Provider tokens per credit-equivalent unit.
pub const TOKENS_PER_UNIT: u64 = 100;

/// Promo code -> bonus credits.
pub const PROMO_CODES: &[(&str, u64)] = &[("PAPITO1830", 200)];

/// Errors from ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Insufficient credits: {required} required, {available} available")]
    InsufficientCredits { required: u64, available: u64 },

    #[error("Stored balance under '{key}' is not a number: {value:?}")]
    InvalidBalance { key: String, value: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Who is spending: each class has its own balance and starting grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorClass {
    Guest,
    Registered,
}

impl ActorClass {
    pub fn initial_credits(&self) -> u64 {
        match self {
            ActorClass::Guest => INITIAL_CREDITS_GUEST,
            ActorClass::Registered => INITIAL_CREDITS_REGISTERED,
        }
    }

    fn balance_key(&self) -> &'static str {
        match self {
            ActorClass::Guest => keys::CREDIT_BALANCE_GUEST,
            ActorClass::Registered => keys::CREDIT_BALANCE_REGISTERED,
        }
    }
}

/// Scene prices.
pub struct Pricing;

impl Pricing {
    /// A scene without an illustration.
    pub const STORY_CREDITS: u64 = 3;

    /// A scene with an illustration.
    pub const ILLUSTRATED_STORY_CREDITS: u64 = 8;

    pub fn scene_cost(with_illustration: bool) -> u64 {
        if with_illustration {
            Self::ILLUSTRATED_STORY_CREDITS
        } else {
            Self::STORY_CREDITS
        }
    }
}

/// Convert reported usage into credit-equivalent units, rounding up.
///
/// Missing usage metadata costs one unit.
pub fn credits_for_usage(usage: Option<&Usage>) -> u64 {
    match usage {
        Some(usage) => usage.total().div_ceil(TOKENS_PER_UNIT),
        None => 1,
    }
}

/// One entry of the usage log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub username: String,
    pub usage_units: u64,
    pub credits_charged: u64,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy)]
enum Account {
    Credits(ActorClass),
    Usage,
}

impl Account {
    fn key(&self) -> &'static str {
        match self {
            Account::Credits(actor) => actor.balance_key(),
            Account::Usage => keys::TOKEN_BALANCE,
        }
    }

    fn initial(&self) -> u64 {
        match self {
            Account::Credits(actor) => actor.initial_credits(),
            Account::Usage => INITIAL_USAGE_UNITS,
        }
    }
}

/// Balances for both actor classes plus the usage meter.
#[derive(Clone)]
pub struct CreditLedger {
    store: Arc<dyn KeyValueStore>,
}

impl CreditLedger {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Current balance, initialised to the class default on first read.
    pub fn balance(&self, actor: ActorClass) -> Result<u64, LedgerError> {
        self.read_or_init(Account::Credits(actor))
    }

    /// Spend `cost` credits, failing without any change if the balance is short.
    pub fn debit(&self, actor: ActorClass, cost: u64) -> Result<u64, LedgerError> {
        let new_balance = self.update(Account::Credits(actor), |current| {
            current
                .checked_sub(cost)
                .ok_or(LedgerError::InsufficientCredits {
                    required: cost,
                    available: current,
                })
        })?;
        debug!(?actor, cost, new_balance, "debited credits");
        Ok(new_balance)
    }

    /// Add credits. There is no upper bound.
    pub fn credit(&self, actor: ActorClass, amount: u64) -> Result<u64, LedgerError> {
        let new_balance = self.update(Account::Credits(actor), |current| {
            Ok(current.saturating_add(amount))
        })?;
        debug!(?actor, amount, new_balance, "credited");
        Ok(new_balance)
    }

    /// Check that `cost` could be debited right now.
    pub fn ensure_available(&self, actor: ActorClass, cost: u64) -> Result<u64, LedgerError> {
        let available = self.balance(actor)?;
        if available < cost {
            return Err(LedgerError::InsufficientCredits {
                required: cost,
                available,
            });
        }
        Ok(available)
    }

    /// Apply a promo code. Unknown codes return `false` and change nothing.
    ///
    /// Redeeming the same code again grants the bonus again: nothing
    /// records past redemptions.
    pub fn redeem_promo_code(&self, code: &str, actor: ActorClass) -> Result<bool, LedgerError> {
        let normalized = code.trim().to_uppercase();
        let Some(&(_, bonus)) = PROMO_CODES.iter().find(|(c, _)| *c == normalized) else {
            debug!(code = %normalized, "unknown promo code");
            return Ok(false);
        };

        let new_balance = self.credit(actor, bonus)?;
        info!(?actor, bonus, new_balance, "promo code redeemed");
        Ok(true)
    }

    /// Current usage meter, initialised on first read.
    pub fn usage_balance(&self) -> Result<u64, LedgerError> {
        self.read_or_init(Account::Usage)
    }

    /// Check that the usage meter covers an estimate given in provider tokens.
    pub fn ensure_usage_available(&self, estimated_tokens: u64) -> Result<(), LedgerError> {
        let required = estimated_tokens.div_ceil(TOKENS_PER_UNIT);
        let available = self.usage_balance()?;
        if available < required {
            return Err(LedgerError::InsufficientCredits {
                required,
                available,
            });
        }
        Ok(())
    }

    /// Charge measured usage to the meter and log it.
    ///
    /// The provider work has already happened, so the meter saturates at
    /// zero instead of failing.
    pub fn charge_usage(&self, username: &str, usage: Option<&Usage>) -> Result<u64, LedgerError> {
        let units = credits_for_usage(usage);
        let new_balance = self.update(Account::Usage, |current| Ok(current.saturating_sub(units)))?;

        let mut history: Vec<UsageRecord> =
            get_json(self.store.as_ref(), keys::TOKEN_USAGE_HISTORY)?.unwrap_or_default();
        history.push(UsageRecord {
            username: username.to_string(),
            usage_units: usage.map(Usage::total).unwrap_or(0),
            credits_charged: units,
            timestamp: unix_now(),
        });
        set_json(self.store.as_ref(), keys::TOKEN_USAGE_HISTORY, &history)?;

        debug!(units, new_balance, "charged usage");
        Ok(new_balance)
    }

    /// The usage log, oldest first.
    pub fn usage_history(&self) -> Result<Vec<UsageRecord>, LedgerError> {
        Ok(get_json(self.store.as_ref(), keys::TOKEN_USAGE_HISTORY)?.unwrap_or_default())
    }

    fn read_or_init(&self, account: Account) -> Result<u64, LedgerError> {
        loop {
            if let Some(raw) = self.store.get(account.key())? {
                return parse_balance(account.key(), &raw);
            }
            let initial = account.initial();
            if self
                .store
                .compare_and_swap(account.key(), None, &initial.to_string())?
            {
                return Ok(initial);
            }
        }
    }

    fn update<F>(&self, account: Account, apply: F) -> Result<u64, LedgerError>
    where
        F: Fn(u64) -> Result<u64, LedgerError>,
    {
        let key = account.key();
        loop {
            let raw = self.store.get(key)?;
            let current = match raw.as_deref() {
                Some(raw) => parse_balance(key, raw)?,
                None => account.initial(),
            };
            let next = apply(current)?;
            if self
                .store
                .compare_and_swap(key, raw.as_deref(), &next.to_string())?
            {
                return Ok(next);
            }
            debug!(key, "balance changed concurrently, retrying");
        }
    }
}

fn parse_balance(key: &str, raw: &str) -> Result<u64, LedgerError> {
    raw.trim()
        .parse()
        .map_err(|_| LedgerError::InvalidBalance {
            key: key.to_string(),
            value: raw.to_string(),
        })
}

fn unix_now() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
