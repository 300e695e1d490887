//! remocolab: SSH and VNC access to a Colab VM
//!
//! Provides the `remocolab` CLI, which provisions sshd, an optional TurboVNC
//! desktop and an ngrok or Argo tunnel, then prints how to connect.

pub mod commands;
pub mod orchestrator;
pub mod output;
pub mod prompt;
