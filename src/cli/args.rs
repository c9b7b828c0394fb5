//! Command-line argument parsing for RagBuddy
//!
//! Provides clap-based CLI with subcommands and verbosity control.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// RagBuddy - Ask questions about your own documents
#[derive(Parser, Debug)]
#[command(name = "ragbuddy")]
#[command(author = "Jerome (Kubashen) Naidoo")]
#[command(version)]
#[command(about = "Retrieval-augmented question answering over a private document corpus", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Index directory (overrides configuration)
    #[arg(long, global = true)]
    pub index: Option<PathBuf>,

    /// Verbosity level: -q (quiet), default (normal), -v (verbose), -vv (very verbose)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (only answers and errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Subcommand
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Add a file or every supported file in a folder to the index
    Ingest {
        /// File or directory
        path: PathBuf,
    },

    /// Ask a single question
    Ask {
        /// The question
        query: String,

        /// Restrict retrieval to a source (repeatable)
        #[arg(long = "source")]
        sources: Vec<String>,

        /// Passages to keep after re-ranking
        #[arg(long)]
        top_k: Option<usize>,

        /// Prompt template name
        #[arg(long)]
        template: Option<String>,

        /// Print the retrieved context before the answer
        #[arg(long)]
        show_context: bool,
    },

    /// Interactive conversation with streamed answers
    Chat {
        /// Restrict retrieval to a source (repeatable)
        #[arg(long = "source")]
        sources: Vec<String>,
    },

    /// Remove every chunk of a source from the index
    Remove {
        /// Source identifier, as listed by `stats`
        source: String,
    },

    /// Show index statistics
    Stats,

    /// Display current configuration
    Config {
        /// Write the default configuration to the config file if absent
        #[arg(long)]
        init: bool,
    },
}

/// Verbosity level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
    VeryVerbose,
}

impl Args {
    /// Get verbosity level based on flags
    pub fn verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Quiet
        } else {
            match self.verbose {
                0 => Verbosity::Normal,
                1 => Verbosity::Verbose,
                _ => Verbosity::VeryVerbose,
            }
        }
    }
}

impl Verbosity {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Verbosity::Quiet => "quiet",
            Verbosity::Normal => "normal",
            Verbosity::Verbose => "verbose",
            Verbosity::VeryVerbose => "very_verbose",
        }
    }

    /// Default log filter for this verbosity; `RUST_LOG` takes precedence
    pub fn log_filter(&self) -> &'static str {
        match self {
            Verbosity::Quiet => "error",
            Verbosity::Normal => "warn",
            Verbosity::Verbose => "ragbuddy=info,warn",
            Verbosity::VeryVerbose => "ragbuddy=debug,info",
        }
    }

    /// Check if should show progress bars
    pub fn show_progress(&self) -> bool {
        !matches!(self, Verbosity::Quiet)
    }

    /// Check if should show sources and pipeline flags
    pub fn show_details(&self) -> bool {
        !matches!(self, Verbosity::Quiet)
    }

    /// Check if should show the visited query states
    pub fn show_trace(&self) -> bool {
        matches!(self, Verbosity::Verbose | Verbosity::VeryVerbose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_verbosity_quiet() {
        let args = parse(&["ragbuddy", "-q", "stats"]);
        assert_eq!(args.verbosity(), Verbosity::Quiet);
    }

    #[test]
    fn test_verbosity_normal() {
        let args = parse(&["ragbuddy", "stats"]);
        assert_eq!(args.verbosity(), Verbosity::Normal);
    }

    #[test]
    fn test_verbosity_very_verbose() {
        let args = parse(&["ragbuddy", "stats", "-vv"]);
        assert_eq!(args.verbosity(), Verbosity::VeryVerbose);
    }

    #[test]
    fn test_ask_with_sources() {
        let args = parse(&[
            "ragbuddy",
            "ask",
            "What is the late filing penalty?",
            "--source",
            "tax.pdf",
            "--source",
            "labor.docx",
        ]);

        match args.command {
            Commands::Ask {
                query, sources, ..
            } => {
                assert_eq!(query, "What is the late filing penalty?");
                assert_eq!(sources, vec!["tax.pdf", "labor.docx"]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_ask_has_no_conversation_flag() {
        // Memory lives in-process, so only `chat` can carry a conversation
        let result = Args::try_parse_from(["ragbuddy", "ask", "penalty?", "--conversation", "c1"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Args::try_parse_from(["ragbuddy"]).is_err());
    }

    #[test]
    fn test_verbosity_methods() {
        assert!(!Verbosity::Quiet.show_progress());
        assert!(Verbosity::Normal.show_progress());

        assert!(!Verbosity::Normal.show_trace());
        assert!(Verbosity::Verbose.show_trace());

        assert_eq!(Verbosity::Quiet.log_filter(), "error");
    }
}
