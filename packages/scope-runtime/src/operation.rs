use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::UnboundedSender;

use scope_domain::{
	ActivationReply, FilterDefinition, FilterSnapshot, NavigationNode, ResultBatch,
};

use crate::backend::{OperationControl, TransportError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationKind {
	Search,
	Activation,
}

/// Tag carried by every delivery so the owning scope can drop stale ones.
///
/// `instance` names the dispatcher that issued the request. Two dispatchers
/// may share a scope id, but never an instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OperationId {
	pub instance: u64,
	pub kind: OperationKind,
	pub seq: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Completion {
	Finished,
	/// The backend gave up on its own.
	Cancelled,
	Failed(TransportError),
}

#[derive(Clone, Debug, PartialEq)]
pub enum SearchDelivery {
	Results(ResultBatch),
	Navigation(NavigationNode),
	Filters { definitions: Vec<FilterDefinition>, state: FilterSnapshot },
	Finished(Completion),
}

#[derive(Clone, Debug, PartialEq)]
pub enum ActivationDelivery {
	Reply(ActivationReply),
	Failed(TransportError),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
	Search(SearchDelivery),
	Activation(ActivationDelivery),
}

/// A backend callback marshaled onto the shell loop.
#[derive(Clone, Debug, PartialEq)]
pub struct Delivery {
	pub scope_id: String,
	pub operation: OperationId,
	pub payload: Payload,
}

#[derive(Debug)]
struct ListenerCore {
	scope_id: String,
	operation: OperationId,
	sender: Mutex<Option<UnboundedSender<Delivery>>>,
}
impl ListenerCore {
	fn new(scope_id: String, operation: OperationId, sender: UnboundedSender<Delivery>) -> Self {
		Self { scope_id, operation, sender: Mutex::new(Some(sender)) }
	}

	// Sends under the lock so a concurrent detach either happens before the send or after it.
	fn send(&self, payload: Payload) -> bool {
		let guard = self.sender.lock().unwrap_or_else(|err| err.into_inner());
		let Some(sender) = guard.as_ref() else {
			return false;
		};

		sender
			.send(Delivery {
				scope_id: self.scope_id.clone(),
				operation: self.operation,
				payload,
			})
			.is_ok()
	}

	fn detach(&self) {
		self.sender.lock().unwrap_or_else(|err| err.into_inner()).take();
	}

	fn is_attached(&self) -> bool {
		self.sender.lock().unwrap_or_else(|err| err.into_inner()).is_some()
	}
}

/// Handed to the backend for one search. Every method returns `false` once the
/// listener has been detached.
#[derive(Clone, Debug)]
pub struct SearchListener {
	core: Arc<ListenerCore>,
}
impl SearchListener {
	pub fn new(
		scope_id: impl Into<String>,
		instance: u64,
		seq: u64,
		sender: UnboundedSender<Delivery>,
	) -> Self {
		let operation = OperationId { instance, kind: OperationKind::Search, seq };

		Self { core: Arc::new(ListenerCore::new(scope_id.into(), operation, sender)) }
	}

	pub fn operation(&self) -> OperationId {
		self.core.operation
	}

	pub fn push(&self, batch: ResultBatch) -> bool {
		self.core.send(Payload::Search(SearchDelivery::Results(batch)))
	}

	pub fn navigation(&self, root: NavigationNode) -> bool {
		self.core.send(Payload::Search(SearchDelivery::Navigation(root)))
	}

	pub fn filters(&self, definitions: Vec<FilterDefinition>, state: FilterSnapshot) -> bool {
		self.core.send(Payload::Search(SearchDelivery::Filters { definitions, state }))
	}

	pub fn finished(&self, completion: Completion) -> bool {
		self.core.send(Payload::Search(SearchDelivery::Finished(completion)))
	}

	pub fn is_attached(&self) -> bool {
		self.core.is_attached()
	}

	pub fn detach(&self) {
		self.core.detach();
	}
}

#[derive(Clone, Debug)]
pub struct ActivationListener {
	core: Arc<ListenerCore>,
}
impl ActivationListener {
	pub fn new(
		scope_id: impl Into<String>,
		instance: u64,
		seq: u64,
		sender: UnboundedSender<Delivery>,
	) -> Self {
		let operation = OperationId { instance, kind: OperationKind::Activation, seq };

		Self { core: Arc::new(ListenerCore::new(scope_id.into(), operation, sender)) }
	}

	pub fn operation(&self) -> OperationId {
		self.core.operation
	}

	pub fn reply(&self, reply: ActivationReply) -> bool {
		self.core.send(Payload::Activation(ActivationDelivery::Reply(reply)))
	}

	pub fn failed(&self, error: TransportError) -> bool {
		self.core.send(Payload::Activation(ActivationDelivery::Failed(error)))
	}

	pub fn is_attached(&self) -> bool {
		self.core.is_attached()
	}

	pub fn detach(&self) {
		self.core.detach();
	}
}

/// The listener half of an [`OperationHandle`], tagged by request kind.
#[derive(Clone, Debug)]
pub enum Listener {
	Search(SearchListener),
	Activation(ActivationListener),
}
impl Listener {
	pub fn operation(&self) -> OperationId {
		match self {
			Self::Search(listener) => listener.operation(),
			Self::Activation(listener) => listener.operation(),
		}
	}

	pub fn is_attached(&self) -> bool {
		match self {
			Self::Search(listener) => listener.is_attached(),
			Self::Activation(listener) => listener.is_attached(),
		}
	}

	pub fn detach(&self) {
		match self {
			Self::Search(listener) => listener.detach(),
			Self::Activation(listener) => listener.detach(),
		}
	}
}

/// Owns the listener and the cancel control of one in-flight request.
///
/// Dropping the handle detaches the listener without cancelling the backend
/// operation; use [`OperationHandle::invalidate`] to cancel.
pub struct OperationHandle {
	listener: Listener,
	control: Option<Box<dyn OperationControl>>,
}
impl OperationHandle {
	pub fn new(listener: Listener, control: Box<dyn OperationControl>) -> Self {
		Self { listener, control: Some(control) }
	}

	pub fn id(&self) -> OperationId {
		self.listener.operation()
	}

	pub fn is_valid(&self) -> bool {
		self.control.is_some() && self.listener.is_attached()
	}

	/// Detaches the listener, then asks the backend to cancel. Never reordered:
	/// a callback racing the cancel must already see a detached listener.
	pub fn invalidate(&mut self) {
		self.listener.detach();

		if let Some(control) = self.control.take() {
			control.cancel();
		}
	}

	/// Retires the handle after the backend reported completion.
	pub fn release(&mut self) {
		self.listener.detach();
		self.control = None;
	}
}
impl std::fmt::Debug for OperationHandle {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("OperationHandle")
			.field("id", &self.id())
			.field("valid", &self.is_valid())
			.finish()
	}
}
impl Drop for OperationHandle {
	fn drop(&mut self) {
		self.listener.detach();
	}
}

/// Forwards directory-level invalidation notifications into the shell loop.
#[derive(Clone, Debug)]
pub struct InvalidationListener {
	sender: UnboundedSender<String>,
}
impl InvalidationListener {
	pub fn new(sender: UnboundedSender<String>) -> Self {
		Self { sender }
	}

	pub fn notify(&self, scope_id: impl Into<String>) -> bool {
		self.sender.send(scope_id.into()).is_ok()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use tokio::sync::mpsc;

	use super::*;

	struct PushOnCancel {
		listener: SearchListener,
		cancels: Arc<AtomicUsize>,
		pushed: Arc<Mutex<Option<bool>>>,
	}
	impl OperationControl for PushOnCancel {
		fn cancel(&self) {
			self.cancels.fetch_add(1, Ordering::SeqCst);

			let accepted = self.listener.push(ResultBatch::default());

			*self.pushed.lock().expect("Lock must not be poisoned.") = Some(accepted);
		}
	}

	#[test]
	fn invalidate_detaches_before_cancelling() {
		let (sender, mut receiver) = mpsc::unbounded_channel();
		let listener = SearchListener::new("news", 7, 1, sender);
		let cancels = Arc::new(AtomicUsize::new(0));
		let pushed = Arc::new(Mutex::new(None));
		let control = PushOnCancel {
			listener: listener.clone(),
			cancels: cancels.clone(),
			pushed: pushed.clone(),
		};
		let mut handle = OperationHandle::new(Listener::Search(listener), Box::new(control));

		assert!(handle.is_valid());

		handle.invalidate();

		assert!(!handle.is_valid());
		assert_eq!(cancels.load(Ordering::SeqCst), 1);
		assert_eq!(*pushed.lock().expect("Lock must not be poisoned."), Some(false));
		assert!(receiver.try_recv().is_err());

		handle.invalidate();

		assert_eq!(cancels.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn drop_detaches_without_cancelling() {
		let (sender, mut receiver) = mpsc::unbounded_channel();
		let listener = SearchListener::new("news", 7, 3, sender);
		let cancels = Arc::new(AtomicUsize::new(0));
		let control = PushOnCancel {
			listener: listener.clone(),
			cancels: cancels.clone(),
			pushed: Arc::new(Mutex::new(None)),
		};
		let handle = OperationHandle::new(Listener::Search(listener.clone()), Box::new(control));

		assert!(listener.push(ResultBatch::default()));

		drop(handle);

		assert!(!listener.push(ResultBatch::default()));
		assert_eq!(cancels.load(Ordering::SeqCst), 0);

		let delivery = receiver.try_recv().expect("Expected the pre-drop delivery.");

		assert_eq!(
			delivery.operation,
			OperationId { instance: 7, kind: OperationKind::Search, seq: 3 }
		);
		assert!(receiver.try_recv().is_err());
	}
}
