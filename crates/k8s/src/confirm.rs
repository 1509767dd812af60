//! Interactive confirmation before mutating the cluster.

use std::io::{self, BufRead, Write};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfirmError {
	#[error("aborted by user")]
	NotConfirmed,

	#[error("reading confirmation")]
	Io(#[from] io::Error),
}

/// Asks the operator to approve an action.
pub trait Confirm: Send + Sync {
	/// Succeeds only if the operator answers exactly `approve`.
	fn confirm(&self, message: &str, approve: &str) -> Result<(), ConfirmError>;
}

/// Prompts on the terminal: prints the message to stderr and reads the answer
/// from stdin.
#[derive(Debug, Clone, Copy, Default)]
pub struct Prompt;

impl Prompt {
	fn ask(
		mut input: impl BufRead,
		mut output: impl Write,
		message: &str,
		approve: &str,
	) -> Result<(), ConfirmError> {
		writeln!(output, "{}", message)?;
		write!(output, "Please type '{}' to confirm: ", approve)?;
		output.flush()?;

		let mut answer = String::new();
		input.read_line(&mut answer)?;

		if answer.trim_end_matches(['\r', '\n']) == approve {
			Ok(())
		} else {
			Err(ConfirmError::NotConfirmed)
		}
	}
}

impl Confirm for Prompt {
	fn confirm(&self, message: &str, approve: &str) -> Result<(), ConfirmError> {
		Self::ask(io::stdin().lock(), io::stderr().lock(), message, approve)
	}
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;
	use rstest::rstest;

	use super::*;

	#[rstest]
	#[case("yes\n", true)]
	#[case("yes", true)]
	#[case("yes\r\n", true)]
	#[case("y\n", false)]
	#[case("YES\n", false)]
	#[case(" yes\n", false)]
	#[case("", false)]
	fn test_prompt_requires_exact_answer(#[case] answer: &str, #[case] approved: bool) {
		let mut output = Vec::new();
		let result = Prompt::ask(answer.as_bytes(), &mut output, "Apply?", "yes");

		assert_eq!(result.is_ok(), approved);
		if !approved {
			assert_matches!(result, Err(ConfirmError::NotConfirmed));
		}
	}

	#[test]
	fn test_prompt_output() {
		let mut output = Vec::new();
		Prompt::ask("yes\n".as_bytes(), &mut output, "Applying to namespace 'prod'", "yes")
			.unwrap();

		assert_eq!(
			String::from_utf8(output).unwrap(),
			"Applying to namespace 'prod'\nPlease type 'yes' to confirm: "
		);
	}
}
