//! Ordered shell commands sent to the guest

/// An ordered list of shell commands, sent one per line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandScript {
    commands: Vec<String>,
}

impl CommandScript {
    pub fn new(commands: Vec<String>) -> Self {
        Self { commands }
    }

    /// Commands in send order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.commands.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for CommandScript {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(Into::into).collect())
    }
}
