use std::mem;

use super::Kid;

/// A callback run at some point of the training loop, free to inspect and
/// steer the kid it receives.
pub type Hook = Box<dyn FnMut(&mut Kid)>;

/// The points of the training loop hooks can be registered at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// After setup, before the first step.
    TrainBegin,
    BatchBegin,
    BatchEnd,
    /// After every validation.
    ValLog,
    TrainEnd,
}

/// The hooks of every event, in registration order.
#[derive(Default)]
pub(crate) struct Hooks {
    train_begin: Vec<Hook>,
    batch_begin: Vec<Hook>,
    batch_end: Vec<Hook>,
    val_log: Vec<Hook>,
    train_end: Vec<Hook>,
}

impl Hooks {
    fn list(&mut self, event: Event) -> &mut Vec<Hook> {
        match event {
            Event::TrainBegin => &mut self.train_begin,
            Event::BatchBegin => &mut self.batch_begin,
            Event::BatchEnd => &mut self.batch_end,
            Event::ValLog => &mut self.val_log,
            Event::TrainEnd => &mut self.train_end,
        }
    }

    pub fn register(&mut self, event: Event, hook: Hook) {
        self.list(event).push(hook);
    }

    /// Takes the hooks of `event` out so they can be given the kid owning them.
    pub fn take(&mut self, event: Event) -> Vec<Hook> {
        mem::take(self.list(event))
    }

    /// Puts back hooks taken with `take`, ahead of any registered meanwhile.
    pub fn restore(&mut self, event: Event, hooks: Vec<Hook>) {
        let list = self.list(event);
        let added = mem::replace(list, hooks);
        list.extend(added);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restore_keeps_hooks_registered_meanwhile_last() {
        let mut hooks = Hooks::default();
        hooks.register(Event::BatchEnd, Box::new(|_: &mut Kid| {}));

        let taken = hooks.take(Event::BatchEnd);
        assert_eq!(taken.len(), 1);
        assert!(hooks.take(Event::BatchEnd).is_empty());

        hooks.register(Event::BatchEnd, Box::new(|_: &mut Kid| {}));
        hooks.restore(Event::BatchEnd, taken);
        assert_eq!(hooks.take(Event::BatchEnd).len(), 2);
        assert!(hooks.take(Event::TrainEnd).is_empty());
    }
}
