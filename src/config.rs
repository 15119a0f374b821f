// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Runtime configuration.

use crate::store::LedgerStore;
use crate::strategy::{DebitStrategy, OptimisticDebit, PessimisticDebit, StrategyKind, UnsafeDebit};
use crate::window::FixedDelay;
use std::sync::Arc;
use std::time::Duration;

/// Settings shared by the store, the executor and the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerConfig {
    pub strategy: StrategyKind,
    /// Upper bound on any single store lock acquisition.
    pub lock_timeout: Duration,
    /// Unsafe strategy only: pause between reading and checking the balance.
    pub check_delay: Duration,
    /// Unsafe strategy only: pause between debit and credit.
    pub settle_delay: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Unsafe,
            lock_timeout: LedgerStore::DEFAULT_LOCK_TIMEOUT,
            check_delay: FixedDelay::CHECK,
            settle_delay: FixedDelay::SETTLE,
        }
    }
}

impl LedgerConfig {
    pub fn with_strategy(self, strategy: StrategyKind) -> Self {
        Self { strategy, ..self }
    }

    pub fn debit_strategy(&self) -> Box<dyn DebitStrategy> {
        match self.strategy {
            StrategyKind::Unsafe => Box::new(UnsafeDebit::new(Arc::new(FixedDelay::new(
                self.check_delay,
                self.settle_delay,
            )))),
            StrategyKind::Pessimistic => Box::new(PessimisticDebit::default()),
            StrategyKind::Optimistic => Box::new(OptimisticDebit::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_the_vulnerable_discipline() {
        let config = LedgerConfig::default();
        assert_eq!(config.strategy, StrategyKind::Unsafe);
        assert_eq!(config.lock_timeout, Duration::from_secs(2));
        assert_eq!(config.check_delay, Duration::from_millis(200));
        assert_eq!(config.settle_delay, Duration::from_millis(50));
    }

    #[test]
    fn builds_the_named_strategy() {
        for kind in StrategyKind::ALL {
            let config = LedgerConfig::default().with_strategy(kind);
            assert_eq!(config.debit_strategy().kind(), kind);
        }
    }
}
