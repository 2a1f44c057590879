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

//! Per-group mutual exclusion

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Serializes mutating operations on the same group
///
/// One async mutex per group id, created on first use. Operations on
/// different groups never wait on each other.
#[derive(Default)]
pub struct GroupLocks {
	locks: DashMap<String, Arc<Mutex<()>>>,
}

impl GroupLocks {
	pub fn new() -> Self {
		Self::default()
	}

	fn lock_for(&self, group_id: &str) -> Arc<Mutex<()>> {
		self.locks
			.entry(group_id.to_string())
			.or_insert_with(|| Arc::new(Mutex::new(())))
			.clone()
	}

	/// Wait for exclusive access to `group_id`; released on drop
	pub async fn acquire(&self, group_id: &str) -> OwnedMutexGuard<()> {
		self.lock_for(group_id).lock_owned().await
	}

	pub fn is_locked(&self, group_id: &str) -> bool {
		self.locks
			.get(group_id)
			.is_some_and(|lock| lock.try_lock().is_err())
	}
}
