use crate::config::RecipeDefaults;
use crate::deploy::DeployRequest;

/// Answer meaning "skip" or "use the default".
const SKIP: &str = "-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WizardStep {
    Kind,
    Token,
    SourceUrl,
    Branch,
    StartCommand,
    BuildCommand,
    EnvVars,
    Done,
}

/// Collects a deployment request one answer at a time.
#[derive(Debug, Clone)]
pub struct DeploymentBuilder {
    step: WizardStep,
    /// `(name, requires_token)` of every known instance type.
    kinds: Vec<(String, bool)>,
    defaults: RecipeDefaults,
    kind: Option<String>,
    token: Option<String>,
    source_url: Option<String>,
    branch: Option<String>,
    start_command: Option<String>,
    build_command: Option<String>,
    env_vars: Option<String>,
}

impl DeploymentBuilder {
    pub fn new(kinds: Vec<(String, bool)>, defaults: RecipeDefaults) -> Self {
        Self {
            step: WizardStep::Kind,
            kinds,
            defaults,
            kind: None,
            token: None,
            source_url: None,
            branch: None,
            start_command: None,
            build_command: None,
            env_vars: None,
        }
    }

    pub fn step(&self) -> WizardStep {
        self.step
    }

    pub fn is_complete(&self) -> bool {
        self.step == WizardStep::Done
    }

    fn token_required(&self) -> bool {
        let kind = self.kind.as_deref().unwrap_or_default();
        self.kinds
            .iter()
            .any(|(name, required)| name == kind && *required)
    }

    /// Question for the current step.
    pub fn prompt(&self) -> String {
        match self.step {
            WizardStep::Kind => {
                let names: Vec<&str> = self.kinds.iter().map(|(n, _)| n.as_str()).collect();
                format!(
                    "Instance type? ({}) '-' for {}",
                    names.join(", "),
                    self.defaults.kind
                )
            }
            WizardStep::Token if self.token_required() => "Bot token?".into(),
            WizardStep::Token => "Token? '-' for none".into(),
            WizardStep::SourceUrl => match &self.defaults.source_url {
                Some(url) => format!("Repository URL? '-' for {url}"),
                None => "Repository URL?".into(),
            },
            WizardStep::Branch => format!("Branch? '-' for {}", self.defaults.branch),
            WizardStep::StartCommand => {
                format!("Start command? '-' for {}", self.defaults.start_command)
            }
            WizardStep::BuildCommand if self.defaults.build_command.is_empty() => {
                "Install command? '-' or 'none' to skip".into()
            }
            WizardStep::BuildCommand => format!(
                "Install command? '-' for {}, 'none' to skip",
                self.defaults.build_command
            ),
            WizardStep::EnvVars => {
                "Extra environment as KEY=VALUE,KEY=VALUE? '-' for none".into()
            }
            WizardStep::Done => "All set.".into(),
        }
    }

    /// Record the answer to the current step and advance. On error the step
    /// is unchanged and the message says what was wrong.
    pub fn answer(&mut self, input: &str) -> Result<WizardStep, String> {
        let input = input.trim();
        if input.is_empty() {
            return Err(format!("Please answer, or send '{SKIP}'."));
        }
        let skip = input == SKIP;

        self.step = match self.step {
            WizardStep::Kind => {
                let kind = if skip { self.defaults.kind.as_str() } else { input };
                if !self.kinds.iter().any(|(name, _)| name == kind) {
                    return Err(format!("Unknown instance type '{kind}'."));
                }
                self.kind = Some(kind.to_string());
                WizardStep::Token
            }
            WizardStep::Token => {
                if skip {
                    if self.token_required() {
                        return Err("This instance type needs a token.".into());
                    }
                    self.token = None;
                } else {
                    self.token = Some(input.to_string());
                }
                WizardStep::SourceUrl
            }
            WizardStep::SourceUrl => {
                let url = match (skip, &self.defaults.source_url) {
                    (false, _) => input.to_string(),
                    (true, Some(url)) => url.clone(),
                    (true, None) => return Err("There is no default repository; enter a URL.".into()),
                };
                self.source_url = Some(url);
                WizardStep::Branch
            }
            WizardStep::Branch => {
                self.branch = Some(if skip { self.defaults.branch.clone() } else { input.to_string() });
                WizardStep::StartCommand
            }
            WizardStep::StartCommand => {
                self.start_command = Some(if skip {
                    self.defaults.start_command.clone()
                } else {
                    input.to_string()
                });
                WizardStep::BuildCommand
            }
            WizardStep::BuildCommand => {
                self.build_command = if input.eq_ignore_ascii_case("none") {
                    None
                } else if skip {
                    Some(self.defaults.build_command.clone()).filter(|c| !c.is_empty())
                } else {
                    Some(input.to_string())
                };
                WizardStep::EnvVars
            }
            WizardStep::EnvVars => {
                self.env_vars = if skip || input.eq_ignore_ascii_case("none") {
                    None
                } else {
                    Some(input.to_string())
                };
                WizardStep::Done
            }
            WizardStep::Done => return Err("Nothing left to answer.".into()),
        };
        Ok(self.step)
    }

    /// The finished request, once every step has an answer.
    pub fn build(&self) -> Option<DeployRequest> {
        if !self.is_complete() {
            return None;
        }
        Some(DeployRequest {
            kind: self.kind.clone()?,
            token: self.token.clone(),
            source_url: self.source_url.clone()?,
            branch: self.branch.clone()?,
            start_command: self.start_command.clone()?,
            build_command: self.build_command.clone(),
            env_vars: self.env_vars.clone(),
        })
    }
}
