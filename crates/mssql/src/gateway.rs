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

//! SQL Server Engine Gateway over tiberius

use async_trait::async_trait;
use rewind_core::{
	DataFile, DatabaseState, EngineConnectionConfig, EngineError, EngineGateway, SparseFile,
};
use rewind_sdk::EngineSnapshotObject;
use tiberius::{AuthMethod, Client, Config, Row};
use tokio::{net::TcpStream, sync::Mutex};
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info, warn};

use crate::quote::{bracket, quote_ident, quote_literal};

const LIST_SNAPSHOT_OBJECTS: &str = "SELECT s.name, src.name \
	FROM sys.databases s \
	JOIN sys.databases src ON s.source_database_id = src.database_id \
	WHERE s.source_database_id IS NOT NULL";

const SNAPSHOT_EXISTS: &str =
	"SELECT 1 FROM sys.databases WHERE name = @P1 AND source_database_id IS NOT NULL";

/// type = 0 selects data files; log files cannot be snapshotted
const LIST_DATA_FILES: &str =
	"SELECT name, physical_name FROM sys.master_files WHERE database_id = DB_ID(@P1) AND type = 0";

const DATABASE_STATE: &str = "SELECT state_desc FROM sys.databases WHERE name = @P1";

const ATTACHED_SESSIONS: &str = "SELECT session_id FROM sys.dm_exec_sessions \
	WHERE database_id = DB_ID(@P1) AND session_id <> @@SPID";

fn map_err(e: tiberius::error::Error) -> EngineError {
	match e {
		tiberius::error::Error::Server(token) => EngineError::CommandRejected(format!(
			"{} (error {})",
			token.message(),
			token.code()
		)),
		tiberius::error::Error::Io { message, .. } => EngineError::ConnectionFailed(message),
		other => EngineError::QueryFailed(other.to_string()),
	}
}

fn text(row: &Row, idx: usize) -> Result<String, EngineError> {
	Ok(row
		.try_get::<&str, _>(idx)
		.map_err(map_err)?
		.unwrap_or_default()
		.to_string())
}

pub(crate) fn create_snapshot_statement(
	source: &str,
	snapshot_name: &str,
	files: &[SparseFile],
) -> Result<String, EngineError> {
	if files.is_empty() {
		return Err(EngineError::CommandRejected(format!(
			"no sparse files for snapshot {}",
			snapshot_name
		)));
	}

	let mut specs = Vec::with_capacity(files.len());
	for file in files {
		specs.push(format!(
			"(NAME = {}, FILENAME = {})",
			quote_ident(&file.logical_name)?,
			quote_literal(&file.path)?
		));
	}

	Ok(format!(
		"CREATE DATABASE {} ON {} AS SNAPSHOT OF {}",
		quote_ident(snapshot_name)?,
		specs.join(", "),
		quote_ident(source)?
	))
}

/// Engine gateway backed by one SQL Server connection
///
/// Catalog reads bind their arguments. DDL is built with the quoting
/// helpers because SQL Server does not accept parameters there.
pub struct SqlServerGateway {
	client: Mutex<Client<Compat<TcpStream>>>,
}

impl SqlServerGateway {
	/// Connect to the `master` database of the configured server
	pub async fn connect(config: &EngineConnectionConfig) -> Result<Self, EngineError> {
		let mut tds = Config::new();
		tds.host(&config.host);
		tds.port(config.port);
		tds.database("master");
		tds.authentication(AuthMethod::sql_server(&config.username, &config.password));
		if config.trust_certificate {
			tds.trust_cert();
		}

		let tcp = TcpStream::connect(tds.get_addr())
			.await
			.map_err(|e| EngineError::ConnectionFailed(e.to_string()))?;
		tcp.set_nodelay(true)
			.map_err(|e| EngineError::ConnectionFailed(e.to_string()))?;

		let client = Client::connect(tds, tcp.compat_write())
			.await
			.map_err(|e| EngineError::ConnectionFailed(e.to_string()))?;

		info!(target: "mssql", host = %config.host, port = config.port, "Connected to SQL Server");

		Ok(Self {
			client: Mutex::new(client),
		})
	}

	async fn rows(&self, sql: &str, arg: &str) -> Result<Vec<Row>, EngineError> {
		let mut client = self.client.lock().await;
		client
			.query(sql, &[&arg])
			.await
			.map_err(map_err)?
			.into_first_result()
			.await
			.map_err(map_err)
	}

	async fn execute(&self, sql: &str) -> Result<(), EngineError> {
		debug!(target: "mssql", statement = %sql, "Executing");
		let mut client = self.client.lock().await;
		client
			.simple_query(sql)
			.await
			.map_err(map_err)?
			.into_results()
			.await
			.map_err(map_err)?;
		Ok(())
	}
}

#[async_trait]
impl EngineGateway for SqlServerGateway {
	async fn list_snapshot_objects(&self) -> Result<Vec<EngineSnapshotObject>, EngineError> {
		let rows = {
			let mut client = self.client.lock().await;
			client
				.simple_query(LIST_SNAPSHOT_OBJECTS)
				.await
				.map_err(map_err)?
				.into_first_result()
				.await
				.map_err(map_err)?
		};

		rows.iter()
			.map(|row| {
				Ok(EngineSnapshotObject {
					name: text(row, 0)?,
					source_database: text(row, 1)?,
				})
			})
			.collect()
	}

	async fn snapshot_exists(&self, name: &str) -> Result<bool, EngineError> {
		Ok(!self.rows(SNAPSHOT_EXISTS, name).await?.is_empty())
	}

	async fn list_data_files(&self, database: &str) -> Result<Vec<DataFile>, EngineError> {
		self.rows(LIST_DATA_FILES, database)
			.await?
			.iter()
			.map(|row| {
				Ok(DataFile {
					logical_name: text(row, 0)?,
					physical_name: text(row, 1)?,
				})
			})
			.collect()
	}

	async fn database_state(&self, database: &str) -> Result<DatabaseState, EngineError> {
		let rows = self.rows(DATABASE_STATE, database).await?;
		let row = rows
			.first()
			.ok_or_else(|| EngineError::DatabaseNotFound(database.to_string()))?;
		Ok(DatabaseState::from_description(&text(row, 0)?))
	}

	async fn create_snapshot_database(
		&self,
		source: &str,
		snapshot_name: &str,
		files: &[SparseFile],
	) -> Result<(), EngineError> {
		self.execute(&create_snapshot_statement(source, snapshot_name, files)?)
			.await
	}

	async fn drop_database(&self, name: &str) -> Result<(), EngineError> {
		self.execute(&format!("DROP DATABASE IF EXISTS {}", quote_ident(name)?))
			.await
	}

	async fn restore_from_snapshot(
		&self,
		database: &str,
		snapshot_name: &str,
	) -> Result<(), EngineError> {
		self.execute(&format!(
			"RESTORE DATABASE {} FROM DATABASE_SNAPSHOT = {}",
			quote_ident(database)?,
			quote_literal(snapshot_name)?
		))
		.await
	}

	async fn restore_with_recovery(&self, database: &str) -> Result<(), EngineError> {
		self.execute(&format!("RESTORE DATABASE {} WITH RECOVERY", quote_ident(database)?))
			.await
	}

	async fn set_single_user(&self, database: &str) -> Result<(), EngineError> {
		self.execute(&format!(
			"ALTER DATABASE {} SET SINGLE_USER WITH ROLLBACK IMMEDIATE",
			quote_ident(database)?
		))
		.await
	}

	async fn set_multi_user(&self, database: &str) -> Result<(), EngineError> {
		self.execute(&format!("ALTER DATABASE {} SET MULTI_USER", quote_ident(database)?))
			.await
	}

	async fn terminate_sessions(&self, database: &str) -> Result<u32, EngineError> {
		let mut sessions = Vec::new();
		for row in self.rows(ATTACHED_SESSIONS, database).await? {
			if let Some(id) = row.try_get::<i16, _>(0).map_err(map_err)? {
				sessions.push(id);
			}
		}

		let mut killed = 0;
		for id in sessions {
			// KILL takes a numeric literal only
			match self.execute(&format!("KILL {}", id)).await {
				Ok(()) => killed += 1,
				Err(e) => {
					warn!(target: "mssql", database, session_id = id, error = %e, "Failed to kill session");
				}
			}
		}
		Ok(killed)
	}

	fn removal_command(&self, name: &str) -> String {
		format!("DROP DATABASE {}", bracket(name))
	}
}
