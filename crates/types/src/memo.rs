// Path: crates/types/src/memo.rs
//! The memo grammar carried in OP_RETURN outputs.
//!
//! Memos are `:`-separated ASCII. The first field names the action (case-insensitive,
//! with short aliases); the remaining fields are action specific. The chain client only
//! needs the action class and, for outbound markers, the referenced inbound txid.

use crate::error::MemoError;
use std::fmt;
use std::str::FromStr;

/// The action a memo encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxType {
    /// Add liquidity.
    Add,
    /// Withdraw liquidity.
    Withdraw,
    /// Market swap.
    Swap,
    /// Limit order.
    LimitOrder,
    /// Outbound answering an inbound.
    Outbound,
    /// Donation to a pool.
    Donate,
    /// Bond to a node.
    Bond,
    /// Unbond from a node.
    Unbond,
    /// Node leave request.
    Leave,
    /// Funds sent to a yggdrasil vault.
    YggdrasilFund,
    /// Funds returned from a yggdrasil vault.
    YggdrasilReturn,
    /// Reserve contribution.
    Reserve,
    /// Refund of an inbound.
    Refund,
    /// Vault migration.
    Migrate,
    /// Chain ragnarok payout.
    Ragnarok,
    /// Native token switch.
    Switch,
    /// No operation.
    Noop,
    /// UTXO consolidation.
    Consolidate,
    /// Name registration.
    Name,
    /// Open a loan.
    LoanOpen,
    /// Repay a loan.
    LoanRepay,
}

impl TxType {
    /// Whether the memo marks a transaction sent by the vaults to a user.
    pub fn is_outbound(&self) -> bool {
        matches!(self, Self::Outbound | Self::Refund | Self::Ragnarok)
    }

    /// Whether the memo marks a vault-to-vault transfer.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            Self::YggdrasilFund | Self::YggdrasilReturn | Self::Migrate | Self::Consolidate
        )
    }

    /// The canonical uppercase action name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Withdraw => "WITHDRAW",
            Self::Swap => "SWAP",
            Self::LimitOrder => "LIMITO",
            Self::Outbound => "OUT",
            Self::Donate => "DONATE",
            Self::Bond => "BOND",
            Self::Unbond => "UNBOND",
            Self::Leave => "LEAVE",
            Self::YggdrasilFund => "YGGDRASIL+",
            Self::YggdrasilReturn => "YGGDRASIL-",
            Self::Reserve => "RESERVE",
            Self::Refund => "REFUND",
            Self::Migrate => "MIGRATE",
            Self::Ragnarok => "RAGNAROK",
            Self::Switch => "SWITCH",
            Self::Noop => "NOOP",
            Self::Consolidate => "CONSOLIDATE",
            Self::Name => "NAME",
            Self::LoanOpen => "LOAN+",
            Self::LoanRepay => "LOAN-",
        }
    }
}

impl FromStr for TxType {
    type Err = MemoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ty = match s.trim().to_ascii_lowercase().as_str() {
            "add" | "+" | "a" => Self::Add,
            "withdraw" | "wd" | "-" => Self::Withdraw,
            "swap" | "s" | "=" => Self::Swap,
            "limito" | "lo" => Self::LimitOrder,
            "out" => Self::Outbound,
            "donate" | "d" => Self::Donate,
            "bond" => Self::Bond,
            "unbond" => Self::Unbond,
            "leave" => Self::Leave,
            "yggdrasil+" => Self::YggdrasilFund,
            "yggdrasil-" => Self::YggdrasilReturn,
            "reserve" => Self::Reserve,
            "refund" => Self::Refund,
            "migrate" => Self::Migrate,
            "ragnarok" => Self::Ragnarok,
            "switch" => Self::Switch,
            "noop" => Self::Noop,
            "consolidate" => Self::Consolidate,
            "name" | "n" | "~" => Self::Name,
            "$+" | "loan+" => Self::LoanOpen,
            "$-" | "loan-" => Self::LoanRepay,
            other => return Err(MemoError::UnknownAction(other.to_string())),
        };
        Ok(ty)
    }
}

impl fmt::Display for TxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed memo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Memo {
    /// The action.
    pub tx_type: TxType,
    /// The inbound txid referenced by `OUT` and `REFUND` memos, uppercase.
    pub tx_id: Option<String>,
    /// Remaining fields, unparsed.
    pub args: Vec<String>,
}

impl Memo {
    /// Parses a memo string.
    pub fn parse(memo: &str) -> Result<Self, MemoError> {
        let memo = memo.trim();
        if memo.is_empty() {
            return Err(MemoError::Empty);
        }
        let mut parts = memo.split(':');
        let action = parts.next().unwrap_or_default();
        let tx_type: TxType = action.parse()?;
        let args: Vec<String> = parts.map(|p| p.trim().to_string()).collect();

        let tx_id = match tx_type {
            TxType::Outbound | TxType::Refund => {
                let id = args.first().filter(|id| !id.is_empty()).ok_or_else(|| {
                    MemoError::MissingField {
                        action: action.to_string(),
                        field: "inbound txid",
                    }
                })?;
                Some(parse_tx_id(id)?)
            }
            TxType::Swap if args.first().map_or(true, |a| a.is_empty()) => {
                return Err(MemoError::MissingField {
                    action: action.to_string(),
                    field: "target asset",
                });
            }
            _ => None,
        };

        Ok(Self {
            tx_type,
            tx_id,
            args,
        })
    }

    /// Whether this memo marks a consolidation.
    pub fn is_consolidate(&self) -> bool {
        self.tx_type == TxType::Consolidate
    }
}

fn parse_tx_id(id: &str) -> Result<String, MemoError> {
    if id.len() == 64 && id.bytes().all(|b| b.is_ascii_hexdigit()) {
        Ok(id.to_ascii_uppercase())
    } else {
        Err(MemoError::InvalidTxId(id.to_string()))
    }
}
