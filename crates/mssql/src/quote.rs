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

//! Identifier and literal quoting for T-SQL statements
//!
//! DDL statements (CREATE/ALTER/DROP/RESTORE DATABASE) cannot take bound
//! parameters, so every name embedded in one goes through here.

use rewind_core::EngineError;

/// Longest identifier SQL Server accepts (sysname)
pub const MAX_IDENTIFIER_LEN: usize = 128;

/// Bracket-quote a name without validating it
pub(crate) fn bracket(name: &str) -> String {
	format!("[{}]", name.replace(']', "]]"))
}

/// Bracket-quote an identifier, doubling any closing bracket
///
/// Rejects empty names, names containing NUL and names longer than
/// [`MAX_IDENTIFIER_LEN`] characters.
pub fn quote_ident(name: &str) -> Result<String, EngineError> {
	if name.is_empty() {
		return Err(EngineError::InvalidIdentifier("empty identifier".to_string()));
	}
	if name.contains('\0') {
		return Err(EngineError::InvalidIdentifier(format!(
			"identifier contains NUL: {:?}",
			name
		)));
	}
	if name.chars().count() > MAX_IDENTIFIER_LEN {
		return Err(EngineError::InvalidIdentifier(format!(
			"identifier longer than {} characters: {}",
			MAX_IDENTIFIER_LEN, name
		)));
	}
	Ok(bracket(name))
}

/// Unicode string literal, doubling any single quote
pub fn quote_literal(value: &str) -> Result<String, EngineError> {
	if value.contains('\0') {
		return Err(EngineError::InvalidIdentifier(format!(
			"literal contains NUL: {:?}",
			value
		)));
	}
	Ok(format!("N'{}'", value.replace('\'', "''")))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_quote_ident() {
		assert_eq!(quote_ident("orders").unwrap(), "[orders]");
		assert_eq!(quote_ident("a]b").unwrap(), "[a]]b]");
		assert_eq!(
			quote_ident("x]; DROP DATABASE master; --").unwrap(),
			"[x]]; DROP DATABASE master; --]"
		);
	}

	#[test]
	fn test_quote_ident_rejects_invalid() {
		assert!(quote_ident("").is_err());
		assert!(quote_ident("a\0b").is_err());
		assert!(quote_ident(&"a".repeat(129)).is_err());
		assert!(quote_ident(&"a".repeat(128)).is_ok());
	}

	#[test]
	fn test_quote_literal() {
		assert_eq!(quote_literal("snap").unwrap(), "N'snap'");
		assert_eq!(quote_literal("o'brien").unwrap(), "N'o''brien'");
		assert_eq!(
			quote_literal(r"C:\Snapshots\s_1.ss").unwrap(),
			r"N'C:\Snapshots\s_1.ss'"
		);
	}
}
