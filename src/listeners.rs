//! Property change notification.

type Callback = Box<dyn FnMut(&str)>;

struct Listener {
    property: String,
    owner: String,
    callback: Callback,
}

/// Registry of callbacks keyed by property name and owner name.
///
/// Callbacks run synchronously, on the thread that changed the property, in
/// the order they were first registered.
#[derive(Default)]
pub struct Notifier {
    listeners: Vec<Listener>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` for changes to `property`. Registering again
    /// with the same property and owner replaces the callback but keeps its
    /// position in the dispatch order.
    pub fn add_listener(
        &mut self,
        property: &str,
        owner: &str,
        callback: impl FnMut(&str) + 'static,
    ) {
        let callback: Callback = Box::new(callback);
        match self
            .listeners
            .iter_mut()
            .find(|l| l.property == property && l.owner == owner)
        {
            Some(existing) => existing.callback = callback,
            None => self.listeners.push(Listener {
                property: property.to_string(),
                owner: owner.to_string(),
                callback,
            }),
        }
    }

    pub fn remove_listener(&mut self, property: &str, owner: &str) {
        self.listeners
            .retain(|l| !(l.property == property && l.owner == owner));
    }

    /// Removes every listener registered by `owner`.
    pub fn remove_all(&mut self, owner: &str) {
        self.listeners.retain(|l| l.owner != owner);
    }

    pub fn has_listener(&self, property: &str, owner: &str) -> bool {
        self.listeners
            .iter()
            .any(|l| l.property == property && l.owner == owner)
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn notify(&mut self, property: &str) {
        for listener in self.listeners.iter_mut().filter(|l| l.property == property) {
            (listener.callback)(property);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{cell::RefCell, rc::Rc};

    fn recorder() -> (Rc<RefCell<Vec<String>>>, impl Fn(&'static str) -> Box<dyn FnMut(&str)>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        let make = move |tag: &'static str| {
            let sink = sink.clone();
            Box::new(move |prop: &str| sink.borrow_mut().push(format!("{tag}:{prop}"))) as Box<dyn FnMut(&str)>
        };
        (log, make)
    }

    #[test]
    fn dispatch_is_ordered_and_filtered() {
        let (log, make) = recorder();
        let mut notifier = Notifier::new();
        notifier.add_listener("size", "a", make("a"));
        notifier.add_listener("lighting", "b", make("b"));
        notifier.add_listener("size", "c", make("c"));

        notifier.notify("size");
        assert_eq!(*log.borrow(), vec!["a:size", "c:size"]);
    }

    #[test]
    fn registration_is_idempotent() {
        let (log, make) = recorder();
        let mut notifier = Notifier::new();
        notifier.add_listener("size", "a", make("first"));
        notifier.add_listener("size", "b", make("b"));
        notifier.add_listener("size", "a", make("second"));
        assert_eq!(notifier.len(), 2);

        notifier.notify("size");
        assert_eq!(*log.borrow(), vec!["second:size", "b:size"]);
    }

    #[test]
    fn removal_is_idempotent() {
        let (log, make) = recorder();
        let mut notifier = Notifier::new();
        notifier.add_listener("size", "a", make("a"));
        notifier.remove_listener("size", "a");
        notifier.remove_listener("size", "a");
        notifier.remove_listener("never", "registered");
        notifier.notify("size");
        assert!(log.borrow().is_empty());
        assert!(notifier.is_empty());
    }

    #[test]
    fn remove_all_only_touches_owner() {
        let (_, make) = recorder();
        let mut notifier = Notifier::new();
        notifier.add_listener("size", "a", make("a"));
        notifier.add_listener("lighting", "a", make("a"));
        notifier.add_listener("size", "b", make("b"));
        notifier.remove_all("a");
        assert!(!notifier.has_listener("size", "a"));
        assert!(notifier.has_listener("size", "b"));
    }
}
