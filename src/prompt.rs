//! Interactive collection of identity fields and secrets.

use std::{
    borrow::Cow,
    io::{self, Write},
};

use zeroize::Zeroizing;

use crate::{credentials::Profile, error::Error};

const DEFAULT_USER_DOMAIN: &str = "Default";

/// Terminal capability used while resolving credentials.
pub trait Prompt {
    /// Shows an informational line.
    fn say(&mut self, message: &str);

    /// Reads one line of visible input.
    fn ask(&mut self, prompt: &str) -> io::Result<String>;

    /// Reads one line without echoing it.
    fn ask_secret(&mut self, prompt: &str) -> io::Result<String>;
}

/// Stdin/stdout prompt used by the binary.
#[derive(Debug, Default)]
pub struct TerminalPrompt;

impl Prompt for TerminalPrompt {
    fn say(&mut self, message: &str) {
        println!("{message}");
    }

    fn ask(&mut self, prompt: &str) -> io::Result<String> {
        print!("{prompt}");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "stdin closed"));
        }
        Ok(input.trim_end_matches(['\r', '\n']).to_string())
    }

    fn ask_secret(&mut self, prompt: &str) -> io::Result<String> {
        rpassword::prompt_password(prompt)
    }
}

/// Fills in whatever the long-term profile leaves out.
///
/// Values already present in the profile are returned as-is; only missing
/// ones are asked for.
#[derive(Debug)]
pub struct CredentialPrompter<P> {
    prompt: P,
}

impl<P: Prompt> CredentialPrompter<P> {
    pub fn new(prompt: P) -> Self {
        Self { prompt }
    }

    #[cfg(test)]
    pub fn prompt(&self) -> &P {
        &self.prompt
    }

    /// `name` is the profile the hint tells the user to edit.
    pub fn resolve_username(&mut self, name: &str, profile: &Profile) -> Result<String, Error> {
        if let Some(username) = profile.auth_str("username") {
            return Ok(username.into_owned());
        }

        self.prompt.say(&format!(
            "Please enter your username for project '{}'",
            project_label(profile)
        ));
        let username = self
            .prompt
            .ask("Username: ")
            .map_err(Error::Prompt)?
            .trim()
            .to_string();
        if username.is_empty() {
            return Err(Error::MissingField("username"));
        }
        self.prompt.say(&format!(
            "Specify a value for {name}.auth.username in your clouds.yaml \
             to suppress this prompt in the future."
        ));
        Ok(username)
    }

    pub fn resolve_user_domain_name(
        &mut self,
        name: &str,
        profile: &Profile,
    ) -> Result<String, Error> {
        if let Some(domain) = profile.auth_str("user_domain_name") {
            return Ok(domain.into_owned());
        }

        self.prompt.say(&format!(
            "Please provide a user_domain_name for user '{}' in project '{}' \
             or press enter to accept the default.",
            profile.auth_str("username").unwrap_or_default(),
            project_label(profile)
        ));
        let input = self
            .prompt
            .ask(&format!("User Domain Name [\"{DEFAULT_USER_DOMAIN}\"]: "))
            .map_err(Error::Prompt)?;
        let domain = match input.trim() {
            "" => {
                self.prompt.say(&format!(
                    "Using default value for user_domain_name: \"{DEFAULT_USER_DOMAIN}\""
                ));
                DEFAULT_USER_DOMAIN.to_string()
            }
            domain => domain.to_string(),
        };
        self.prompt.say(&format!(
            "Specify a value for {name}.auth.user_domain_name in your clouds.yaml \
             to suppress this prompt in the future."
        ));
        Ok(domain)
    }

    /// Reuses a password carried over from sanitizing the profile in this run;
    /// otherwise always asks. The profile itself is never a password source.
    pub fn resolve_password(
        &mut self,
        profile: &Profile,
        carried: Option<Zeroizing<String>>,
    ) -> Result<Zeroizing<String>, Error> {
        if let Some(password) = carried {
            return Ok(password);
        }

        self.prompt.say(&format!(
            "Authenticating '{}' in project '{}'",
            profile.auth_str("username").unwrap_or_default(),
            project_label(profile)
        ));
        self.prompt
            .ask_secret("Enter Password: ")
            .map(Zeroizing::new)
            .map_err(Error::Prompt)
    }

    /// Empty input means the account has no MFA.
    pub fn resolve_mfa_code(&mut self) -> Result<Zeroizing<String>, Error> {
        self.prompt
            .ask("MFA Code (Press enter to skip): ")
            .map(|code| Zeroizing::new(code.trim().to_string()))
            .map_err(Error::Prompt)
    }
}

/// Keystone expects the one-time code appended to the password.
pub fn combine_secret(password: &str, mfa_code: &str) -> Zeroizing<String> {
    let mut secret = Zeroizing::new(String::with_capacity(password.len() + mfa_code.len()));
    secret.push_str(password);
    secret.push_str(mfa_code);
    secret
}

fn project_label(profile: &Profile) -> Cow<'_, str> {
    profile
        .auth_str("project_name")
        .or_else(|| profile.auth_str("project_id"))
        .unwrap_or_default()
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;

    use super::*;

    /// Answers prompts from a script and records everything shown.
    #[derive(Debug, Default)]
    pub(crate) struct ScriptedPrompt {
        answers: VecDeque<String>,
        pub(crate) asked: Vec<String>,
        pub(crate) said: Vec<String>,
    }

    impl ScriptedPrompt {
        pub(crate) fn new<'a>(answers: impl IntoIterator<Item = &'a str>) -> Self {
            Self {
                answers: answers.into_iter().map(str::to_string).collect(),
                ..Self::default()
            }
        }

        fn next(&mut self, prompt: &str) -> io::Result<String> {
            self.asked.push(prompt.to_string());
            self.answers
                .pop_front()
                .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "script exhausted"))
        }
    }

    impl Prompt for ScriptedPrompt {
        fn say(&mut self, message: &str) {
            self.said.push(message.to_string());
        }

        fn ask(&mut self, prompt: &str) -> io::Result<String> {
            self.next(prompt)
        }

        fn ask_secret(&mut self, prompt: &str) -> io::Result<String> {
            self.next(prompt)
        }
    }
}
