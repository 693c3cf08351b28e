/// Common test utilities and mock infrastructure
///
/// This module provides shared functionality for integration tests including:
/// - A scripted tool runner standing in for the real external tools
/// - Shared test fixtures and canned tool output

pub mod fixtures;
pub mod mock_commands;
