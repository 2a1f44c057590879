// Copyright 2025 itscheems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

/// Source of the current instant
///
/// Snapshot ids hash the creation instant, so tests inject a fixed clock
/// to get deterministic ids and timestamps.
pub trait Clock: Send + Sync {
	fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now(&self) -> DateTime<Utc> {
		Utc::now()
	}
}

/// Manually driven clock for tests
#[derive(Debug)]
pub struct FixedClock {
	now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
	pub fn new(now: DateTime<Utc>) -> Self {
		Self {
			now: Mutex::new(now),
		}
	}

	pub fn set(&self, now: DateTime<Utc>) {
		if let Ok(mut guard) = self.now.lock() {
			*guard = now;
		}
	}

	pub fn advance(&self, by: Duration) {
		if let Ok(mut guard) = self.now.lock() {
			*guard += by;
		}
	}
}

impl Clock for FixedClock {
	fn now(&self) -> DateTime<Utc> {
		match self.now.lock() {
			Ok(guard) => *guard,
			Err(poisoned) => *poisoned.into_inner(),
		}
	}
}
