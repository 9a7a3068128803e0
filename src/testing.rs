//! Test-only support code: a scriptable [`Transport`] mock used to drive
//! the retry-policy and end-to-end scenario tests in `protocol`, `transfer`,
//! and `bootstrap` without any real hardware.

#[cfg(test)]
pub mod mock {
    use std::cell::RefCell;
    use std::collections::{HashMap, VecDeque};
    use std::time::Duration;

    use crate::error::Error;
    use crate::transport::{RequestType, Transport};

    /// One scripted outcome for a control transfer. Kept free of `Error` so
    /// scripts can be built with plain `vec![...]` without requiring `Error`
    /// to implement `Clone`.
    #[derive(Debug, Clone, Copy)]
    pub enum ScriptedReply {
        Ok(usize),
        /// Times out having moved zero bytes.
        Timeout,
        /// Times out having moved `.0` bytes — lets tests drive the
        /// "timeout but complete" quirk by scripting a byte count equal to
        /// the requested transfer length.
        TimeoutBytes(usize),
        Pipe,
        NoDevice,
    }

    impl ScriptedReply {
        fn into_result(self) -> Result<usize, Error> {
            match self {
                ScriptedReply::Ok(n) => Ok(n),
                ScriptedReply::Timeout => Err(Error::Timeout { bytes_transferred: 0 }),
                ScriptedReply::TimeoutBytes(n) => Err(Error::Timeout { bytes_transferred: n }),
                ScriptedReply::Pipe => Err(Error::Usb(rusb::Error::Pipe)),
                ScriptedReply::NoDevice => Err(Error::Usb(rusb::Error::NoDevice)),
            }
        }
    }

    /// A [`Transport`] whose `control` replies are pre-scripted per request
    /// code, and whose bulk transfers default to succeeding with the full
    /// buffer length unless a script is pushed via [`MockTransport::push_bulk_out_script`]
    /// / [`MockTransport::push_bulk_in_script`].
    #[derive(Default)]
    pub struct MockTransport {
        control_scripts: RefCell<HashMap<u8, VecDeque<ScriptedReply>>>,
        bulk_out_script: RefCell<VecDeque<ScriptedReply>>,
        bulk_in_script: RefCell<VecDeque<ScriptedReply>>,
        pub control_calls: RefCell<Vec<(u8, u16, u16)>>,
        pub bulk_out_calls: RefCell<Vec<Vec<u8>>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            MockTransport::default()
        }

        /// Queues `replies` to be returned, in order, for every `control()`
        /// call made with the given `request` code. Once exhausted, further
        /// calls for that code panic — scripts are meant to be exact.
        pub fn push_control_script(&self, request: u8, replies: Vec<ScriptedReply>) {
            self.control_scripts
                .borrow_mut()
                .entry(request)
                .or_insert_with(VecDeque::new)
                .extend(replies);
        }

        /// Queues `replies` to be returned, in order, for every `bulk_out()`
        /// call, regardless of endpoint. Once exhausted, calls fall back to
        /// the default "succeeds with the full buffer length" behavior.
        pub fn push_bulk_out_script(&self, replies: Vec<ScriptedReply>) {
            self.bulk_out_script.borrow_mut().extend(replies);
        }

        /// Queues `replies` to be returned, in order, for every `bulk_in()`
        /// call, regardless of endpoint. Once exhausted, calls fall back to
        /// the default "succeeds with the full buffer length" behavior.
        pub fn push_bulk_in_script(&self, replies: Vec<ScriptedReply>) {
            self.bulk_in_script.borrow_mut().extend(replies);
        }
    }

    impl Transport for MockTransport {
        fn control(
            &self,
            _request_type: RequestType,
            request: u8,
            value: u16,
            index: u16,
            buffer: &mut [u8],
            _timeout: Duration,
        ) -> Result<usize, Error> {
            self.control_calls.borrow_mut().push((request, value, index));

            let mut scripts = self.control_scripts.borrow_mut();
            let queue = scripts
                .get_mut(&request)
                .unwrap_or_else(|| panic!("no script pushed for request {:#04x}", request));
            let reply = queue
                .pop_front()
                .unwrap_or_else(|| panic!("script for request {:#04x} exhausted", request));

            match reply.into_result() {
                Ok(n) => {
                    for b in buffer.iter_mut() {
                        *b = 0;
                    }
                    Ok(n.min(buffer.len().max(n)))
                }
                Err(e) => Err(e),
            }
        }

        fn bulk_out(&self, _endpoint: u8, buffer: &[u8], _timeout: Duration) -> Result<usize, Error> {
            self.bulk_out_calls.borrow_mut().push(buffer.to_vec());

            match self.bulk_out_script.borrow_mut().pop_front() {
                Some(reply) => reply.into_result(),
                None => Ok(buffer.len()),
            }
        }

        fn bulk_in(&self, _endpoint: u8, buffer: &mut [u8], _timeout: Duration) -> Result<usize, Error> {
            match self.bulk_in_script.borrow_mut().pop_front() {
                Some(reply) => reply.into_result(),
                None => Ok(buffer.len()),
            }
        }

        fn interrupt(&self, _endpoint: u8, buffer: &mut [u8], _timeout: Duration) -> Result<usize, Error> {
            Ok(buffer.len())
        }
    }
}
