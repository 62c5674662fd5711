// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Typed views of the component state, port direction and command enumerations.

/// Component state as reported by the codec core.
///
/// The ordering follows the raw values, which is what decides whether a
/// requested transition counts as forward progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum State {
    /// Terminal state of a component that can no longer be used.
    Invalid,
    Loaded,
    Idle,
    Executing,
    Pause,
    WaitForResources,
}

impl State {
    /// Maps a raw state value; unknown values are treated as [`State::Invalid`].
    pub fn from_raw(raw: omx_sys::StateType) -> Self {
        match raw {
            omx_sys::OMX_StateLoaded => State::Loaded,
            omx_sys::OMX_StateIdle => State::Idle,
            omx_sys::OMX_StateExecuting => State::Executing,
            omx_sys::OMX_StatePause => State::Pause,
            omx_sys::OMX_StateWaitForResources => State::WaitForResources,
            _ => State::Invalid,
        }
    }

    pub fn as_raw(self) -> omx_sys::StateType {
        match self {
            State::Invalid => omx_sys::OMX_StateInvalid,
            State::Loaded => omx_sys::OMX_StateLoaded,
            State::Idle => omx_sys::OMX_StateIdle,
            State::Executing => omx_sys::OMX_StateExecuting,
            State::Pause => omx_sys::OMX_StatePause,
            State::WaitForResources => omx_sys::OMX_StateWaitForResources,
        }
    }
}

/// Data direction of a port, seen from the component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// The pipeline hands buffers to the component to be emptied.
    Input,
    /// The component fills buffers and hands them back.
    Output,
}

impl Direction {
    pub fn from_raw(raw: omx_sys::DirType) -> Option<Self> {
        match raw {
            omx_sys::OMX_DirInput => Some(Direction::Input),
            omx_sys::OMX_DirOutput => Some(Direction::Output),
            _ => None,
        }
    }

    pub fn as_raw(self) -> omx_sys::DirType {
        match self {
            Direction::Input => omx_sys::OMX_DirInput,
            Direction::Output => omx_sys::OMX_DirOutput,
        }
    }
}

/// Asynchronous command sent to a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    StateSet(State),
    Flush(u32),
    PortDisable(u32),
    PortEnable(u32),
}

impl Command {
    /// Returns the raw command and its parameter.
    pub fn as_raw(self) -> (omx_sys::CommandType, u32) {
        match self {
            Command::StateSet(state) => (omx_sys::OMX_CommandStateSet, state.as_raw()),
            Command::Flush(port) => (omx_sys::OMX_CommandFlush, port),
            Command::PortDisable(port) => (omx_sys::OMX_CommandPortDisable, port),
            Command::PortEnable(port) => (omx_sys::OMX_CommandPortEnable, port),
        }
    }
}
