// Copyright 2024 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Error types used throughout the crate.
//!
//! Two families of errors exist. [`ConfigurationError`] reports mistakes
//! made while a server is being configured (bad patterns, registration
//! after freeze, mount cycles); it is fatal and never reaches the wire.
//! [`RequestError`] is the recoverable error that travels through the
//! middleware stacks while a request is being served; exception-handler
//! middleware dispatches on its [`ErrorClass`] and converts it into a
//! well-formed DNS response.

use std::fmt;

use crate::name;

////////////////////////////////////////////////////////////////////////
// ERROR CLASSES                                                      //
////////////////////////////////////////////////////////////////////////

/// The class of a [`RequestError`], used to select an exception
/// handler.
///
/// Classes form a tree with [`ErrorClass::Any`] at the root. Each class
/// has a single chain of ancestors, and handler lookup walks that chain
/// from the raised class up to the root, taking the first registered
/// handler (most specific wins). Application-defined failures can carry
/// their own label through [`ErrorClass::Custom`]; such classes sit
/// directly under [`ErrorClass::Handler`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorClass {
    /// The root of the class tree. A handler registered for `Any`
    /// replaces the built-in default handler of its stack.
    Any,

    /// A failure raised by user code: a handler, a middleware, or a
    /// hook.
    Handler,

    /// A handler declined to implement the requested operation.
    NotImplemented,

    /// A handler refused to serve the request.
    Refused,

    /// The wire codec rejected data it was given.
    Decode,

    /// The request was cancelled: its connection went away or its
    /// deadline passed.
    Cancelled,

    /// An application-defined class, identified by label. Sits under
    /// [`ErrorClass::Handler`].
    Custom(&'static str),
}

impl ErrorClass {
    /// Returns the parent of this class, or [`None`] for the root.
    pub fn parent(self) -> Option<ErrorClass> {
        match self {
            Self::Any => None,
            Self::Handler | Self::Decode | Self::Cancelled => Some(Self::Any),
            Self::NotImplemented | Self::Refused | Self::Custom(_) => Some(Self::Handler),
        }
    }

    /// Returns an iterator over this class and its ancestors, starting
    /// with the class itself and ending at [`ErrorClass::Any`].
    pub fn ancestry(self) -> Ancestry {
        Ancestry(Some(self))
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::Any => f.write_str("Any"),
            Self::Handler => f.write_str("Handler"),
            Self::NotImplemented => f.write_str("NotImplemented"),
            Self::Refused => f.write_str("Refused"),
            Self::Decode => f.write_str("Decode"),
            Self::Cancelled => f.write_str("Cancelled"),
            Self::Custom(label) => write!(f, "Custom({label})"),
        }
    }
}

/// An iterator over an [`ErrorClass`] and its ancestors. Created by
/// [`ErrorClass::ancestry`].
#[derive(Clone, Debug)]
pub struct Ancestry(Option<ErrorClass>);

impl Iterator for Ancestry {
    type Item = ErrorClass;

    fn next(&mut self) -> Option<ErrorClass> {
        let current = self.0?;
        self.0 = current.parent();
        Some(current)
    }
}

////////////////////////////////////////////////////////////////////////
// REQUEST ERRORS                                                     //
////////////////////////////////////////////////////////////////////////

/// A recoverable error raised while serving a request.
///
/// `RequestError`s are caught by the exception-handler middleware at
/// the head of each stack and converted into DNS responses, so they
/// never propagate to the peer as anything but a well-formed message.
#[derive(Clone, Debug)]
pub struct RequestError {
    class: ErrorClass,
    message: String,
}

impl RequestError {
    /// Creates a new `RequestError` with the given class and message.
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }

    /// Creates an error of class [`ErrorClass::Handler`].
    pub fn handler(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Handler, message)
    }

    /// Creates an error of class [`ErrorClass::NotImplemented`].
    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::NotImplemented, message)
    }

    /// Creates an error of class [`ErrorClass::Refused`].
    pub fn refused(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Refused, message)
    }

    /// Creates an error of class [`ErrorClass::Decode`].
    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Decode, message)
    }

    /// Creates an error of class [`ErrorClass::Cancelled`].
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Cancelled, message)
    }

    /// Creates an error of an application-defined class.
    pub fn custom(label: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Custom(label), message)
    }

    /// Returns the class of this error.
    pub fn class(&self) -> ErrorClass {
        self.class
    }

    /// Returns the message of this error.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.class, self.message)
    }
}

impl std::error::Error for RequestError {}

////////////////////////////////////////////////////////////////////////
// CONFIGURATION ERRORS                                               //
////////////////////////////////////////////////////////////////////////

/// An error reporting an invalid server configuration.
///
/// These are raised while rules, middleware, and handlers are being
/// registered, or when registration is attempted after the server has
/// been frozen by starting it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConfigurationError {
    /// Registration was attempted after the configuration was frozen.
    Frozen,

    /// A rule pattern was empty.
    EmptyPattern,

    /// A rule pattern was invalid. The message explains why.
    InvalidPattern(String),

    /// A name used in a pattern or rule was invalid.
    InvalidName(name::Error),

    /// A query type string was not recognized.
    UnknownQtype(String),

    /// Mounting a container would have made it reachable from itself.
    MountCycle(String),

    /// An exception handler is already registered for the class.
    DuplicateExceptionHandler(ErrorClass),
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Frozen => f.write_str("configuration is frozen; the server has been started"),
            Self::EmptyPattern => f.write_str("rule pattern is empty"),
            Self::InvalidPattern(why) => write!(f, "invalid rule pattern: {why}"),
            Self::InvalidName(e) => write!(f, "invalid name: {e}"),
            Self::UnknownQtype(text) => write!(f, "unknown query type: {text}"),
            Self::MountCycle(name) => {
                write!(f, "mounting container {name} would create a cycle")
            }
            Self::DuplicateExceptionHandler(class) => {
                write!(f, "an exception handler is already registered for {class}")
            }
        }
    }
}

impl std::error::Error for ConfigurationError {}

impl From<name::Error> for ConfigurationError {
    fn from(e: name::Error) -> Self {
        Self::InvalidName(e)
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ancestry_walks_to_the_root() {
        let chain: Vec<ErrorClass> = ErrorClass::NotImplemented.ancestry().collect();
        assert_eq!(
            chain,
            vec![
                ErrorClass::NotImplemented,
                ErrorClass::Handler,
                ErrorClass::Any,
            ],
        );
    }

    #[test]
    fn custom_classes_sit_under_handler() {
        let chain: Vec<ErrorClass> = ErrorClass::Custom("OutOfCheese").ancestry().collect();
        assert_eq!(
            chain,
            vec![
                ErrorClass::Custom("OutOfCheese"),
                ErrorClass::Handler,
                ErrorClass::Any,
            ],
        );
    }

    #[test]
    fn root_ancestry_is_itself() {
        let chain: Vec<ErrorClass> = ErrorClass::Any.ancestry().collect();
        assert_eq!(chain, vec![ErrorClass::Any]);
    }
}
