use tracing::debug;

// ============================================================================
// COMMAND TRAIT
// ============================================================================

/// An invertible edit over some target `T`.
///
/// `apply` and `unapply` validate before they mutate: an `Err` means the
/// target is exactly as it was before the call. Commands may capture their
/// "before" state lazily on the first `apply`, which is why both take
/// `&mut self`.
pub trait Command<T, E>: Send + Sync {
    fn apply(&mut self, target: &mut T) -> Result<(), E>;
    fn unapply(&mut self, target: &mut T) -> Result<(), E>;
    fn description(&self) -> String;
    /// Approximate heap footprint of the captured undo state.
    fn memory_size(&self) -> usize {
        std::mem::size_of_val(self)
    }
}

pub type BoxedCommand<T, E> = Box<dyn Command<T, E>>;

// ============================================================================
// COMMAND GROUP - one history entry made of many commands
// ============================================================================

/// Applies its members in insertion order and unapplies them in strict
/// reverse order. If a member fails, the members already run are rolled
/// back before the error is returned.
pub struct CommandGroup<T, E> {
    description: String,
    items: Vec<BoxedCommand<T, E>>,
}

impl<T, E> CommandGroup<T, E> {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            items: Vec::new(),
        }
    }

    pub fn from_items(description: impl Into<String>, items: Vec<BoxedCommand<T, E>>) -> Self {
        Self {
            description: description.into(),
            items,
        }
    }

    pub fn add(&mut self, item: BoxedCommand<T, E>) {
        self.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T, E> Command<T, E> for CommandGroup<T, E>
where
    T: 'static,
    E: 'static,
{
    fn apply(&mut self, target: &mut T) -> Result<(), E> {
        for i in 0..self.items.len() {
            if let Err(err) = self.items[i].apply(target) {
                for done in self.items[..i].iter_mut().rev() {
                    if done.unapply(target).is_err() {
                        debug!(member = %done.description(), "group rollback step failed");
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }

    fn unapply(&mut self, target: &mut T) -> Result<(), E> {
        let len = self.items.len();
        for i in (0..len).rev() {
            if let Err(err) = self.items[i].unapply(target) {
                for done in self.items[i + 1..].iter_mut() {
                    if done.apply(target).is_err() {
                        debug!(member = %done.description(), "group rollback step failed");
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn memory_size(&self) -> usize {
        self.items.iter().map(|c| c.memory_size()).sum()
    }
}

// ============================================================================
// HISTORY MANAGER - linear undo stack with a cursor and capture batches
// ============================================================================

/// Undo/redo history over an external target.
///
/// Entries `[0, stack_index)` are applied; the rest are redoable. The
/// manager never owns the target, the caller passes it into every call.
pub struct HistoryManager<T, E> {
    stack: Vec<BoxedCommand<T, E>>,
    stack_index: usize,
    /// `Some` while a capture batch is open.
    batch: Option<Vec<BoxedCommand<T, E>>>,
    /// 0 = unlimited.
    max_steps: usize,
    total_memory: usize,
}

impl<T: 'static, E: 'static> Default for HistoryManager<T, E> {
    fn default() -> Self {
        Self::new(0)
    }
}

impl<T: 'static, E: 'static> HistoryManager<T, E> {
    pub fn new(max_steps: usize) -> Self {
        Self {
            stack: Vec::new(),
            stack_index: 0,
            batch: None,
            max_steps,
            total_memory: 0,
        }
    }

    pub fn set_max_steps(&mut self, max_steps: usize) {
        self.max_steps = max_steps;
        self.prune();
    }

    /// Apply `command` and record it.
    ///
    /// While capturing, the command joins the open batch instead of the
    /// history. A command whose `apply` fails is dropped and nothing is
    /// recorded.
    pub fn push(&mut self, target: &mut T, mut command: BoxedCommand<T, E>) -> Result<(), E> {
        command.apply(target)?;
        debug!(command = %command.description(), capturing = self.batch.is_some(), "applied");
        match self.batch.as_mut() {
            Some(batch) => batch.push(command),
            None => self.record(command),
        }
        Ok(())
    }

    /// Append an already-applied command at the cursor.
    fn record(&mut self, command: BoxedCommand<T, E>) {
        self.truncate_redo();
        self.total_memory += command.memory_size();
        self.stack.push(command);
        self.stack_index += 1;
        self.prune();
    }

    fn truncate_redo(&mut self) {
        for dropped in self.stack.drain(self.stack_index..) {
            self.total_memory = self.total_memory.saturating_sub(dropped.memory_size());
        }
    }

    /// Start a batch. Pushes until [`HistoryManager::release`] become one
    /// history entry. Capturing while already capturing keeps the open batch.
    pub fn capture(&mut self) {
        if self.batch.is_none() {
            self.batch = Some(Vec::new());
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.batch.is_some()
    }

    /// Close the batch and record it as one group. An empty batch records
    /// nothing.
    pub fn release(&mut self, description: impl Into<String>) {
        let Some(items) = self.batch.take() else {
            return;
        };
        if items.is_empty() {
            return;
        }
        let group = CommandGroup::from_items(description, items);
        debug!(command = %group.description(), members = group.len(), "released batch");
        self.record(Box::new(group));
    }

    /// Unapply and discard the most recent command, whether it sits in an
    /// open batch or in the history. Redoable entries are discarded too.
    pub fn pop(&mut self, target: &mut T) -> Result<Option<BoxedCommand<T, E>>, E> {
        if let Some(batch) = self.batch.as_mut() {
            let Some(mut command) = batch.pop() else {
                return Ok(None);
            };
            if let Err(err) = command.unapply(target) {
                batch.push(command);
                return Err(err);
            }
            return Ok(Some(command));
        }
        if self.stack_index == 0 {
            return Ok(None);
        }
        self.stack[self.stack_index - 1].unapply(target)?;
        self.truncate_redo();
        self.stack_index -= 1;
        let command = self.stack.pop();
        if let Some(c) = &command {
            self.total_memory = self.total_memory.saturating_sub(c.memory_size());
        }
        Ok(command)
    }

    /// Step back once. Returns the description of the undone command, or
    /// `None` when there is nothing to undo.
    pub fn undo(&mut self, target: &mut T) -> Result<Option<String>, E> {
        if self.stack_index == 0 {
            return Ok(None);
        }
        let command = &mut self.stack[self.stack_index - 1];
        command.unapply(target)?;
        let description = command.description();
        self.stack_index -= 1;
        debug!(command = %description, "undo");
        Ok(Some(description))
    }

    pub fn redo(&mut self, target: &mut T) -> Result<Option<String>, E> {
        if self.stack_index == self.stack.len() {
            return Ok(None);
        }
        let command = &mut self.stack[self.stack_index];
        command.apply(target)?;
        let description = command.description();
        self.stack_index += 1;
        debug!(command = %description, "redo");
        Ok(Some(description))
    }

    pub fn can_undo(&self) -> bool {
        self.stack_index > 0
    }

    pub fn can_redo(&self) -> bool {
        self.stack_index < self.stack.len()
    }

    pub fn undo_description(&self) -> Option<String> {
        self.stack_index.checked_sub(1).map(|i| self.stack[i].description())
    }

    pub fn redo_description(&self) -> Option<String> {
        self.stack.get(self.stack_index).map(|c| c.description())
    }

    /// Undoable descriptions, most recent first.
    pub fn undo_history(&self) -> Vec<String> {
        self.stack[..self.stack_index].iter().rev().map(|c| c.description()).collect()
    }

    /// Every recorded description in order, with the cursor position.
    pub fn history(&self) -> (Vec<String>, usize) {
        (self.stack.iter().map(|c| c.description()).collect(), self.stack_index)
    }

    pub fn memory_usage(&self) -> usize {
        self.total_memory
    }

    /// Drop the oldest entries past the step limit.
    fn prune(&mut self) {
        if self.max_steps == 0 {
            return;
        }
        while self.stack_index > self.max_steps {
            let removed = self.stack.remove(0);
            self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
            self.stack_index -= 1;
        }
    }

    pub fn clear(&mut self) {
        self.stack.clear();
        self.stack_index = 0;
        self.batch = None;
        self.total_memory = 0;
    }

    /// Undo `steps` times, stopping early at the start of history.
    pub fn undo_to(&mut self, steps: usize, target: &mut T) -> Result<usize, E> {
        let mut undone = 0;
        while undone < steps && self.undo(target)?.is_some() {
            undone += 1;
        }
        Ok(undone)
    }

    pub fn undo_count(&self) -> usize {
        self.stack_index
    }

    pub fn redo_count(&self) -> usize {
        self.stack.len() - self.stack_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Appends a value; fails instead if the value is negative.
    struct PushValue(i32);

    impl Command<Vec<i32>, String> for PushValue {
        fn apply(&mut self, target: &mut Vec<i32>) -> Result<(), String> {
            if self.0 < 0 {
                return Err(format!("rejected {}", self.0));
            }
            target.push(self.0);
            Ok(())
        }

        fn unapply(&mut self, target: &mut Vec<i32>) -> Result<(), String> {
            target.pop();
            Ok(())
        }

        fn description(&self) -> String {
            format!("push {}", self.0)
        }
    }

    fn push(history: &mut HistoryManager<Vec<i32>, String>, target: &mut Vec<i32>, value: i32) {
        history.push(target, Box::new(PushValue(value))).unwrap();
    }

    #[test]
    fn history_can_be_shared_across_threads() {
        fn assert_send_sync<S: Send + Sync>() {}
        assert_send_sync::<HistoryManager<Vec<i32>, String>>();
        assert_send_sync::<CommandGroup<Vec<i32>, String>>();
        assert_send_sync::<BoxedCommand<Vec<i32>, String>>();
    }

    #[test]
    fn undo_redo_walks_the_cursor() {
        let mut history = HistoryManager::default();
        let mut target = Vec::new();
        push(&mut history, &mut target, 1);
        push(&mut history, &mut target, 2);
        assert_eq!(history.undo(&mut target).unwrap().as_deref(), Some("push 2"));
        assert_eq!(target, vec![1]);
        assert!(history.can_redo());
        history.redo(&mut target).unwrap();
        assert_eq!(target, vec![1, 2]);
        assert_eq!(history.redo(&mut target).unwrap(), None);
    }

    #[test]
    fn push_after_undo_truncates_redo() {
        let mut history = HistoryManager::default();
        let mut target = Vec::new();
        push(&mut history, &mut target, 1);
        push(&mut history, &mut target, 2);
        history.undo(&mut target).unwrap();
        push(&mut history, &mut target, 3);
        assert!(!history.can_redo());
        assert_eq!(history.history(), (vec!["push 1".to_string(), "push 3".to_string()], 2));
    }

    #[test]
    fn undo_on_empty_history_is_noop() {
        let mut history: HistoryManager<Vec<i32>, String> = HistoryManager::default();
        let mut target = Vec::new();
        assert_eq!(history.undo(&mut target).unwrap(), None);
        assert!(!history.can_undo());
    }

    #[test]
    fn failed_apply_is_not_recorded() {
        let mut history = HistoryManager::default();
        let mut target = vec![7];
        assert!(history.push(&mut target, Box::new(PushValue(-1))).is_err());
        assert_eq!(target, vec![7]);
        assert!(!history.can_undo());
    }

    #[test]
    fn captured_batch_is_one_step() {
        let mut history = HistoryManager::default();
        let mut target = Vec::new();
        history.capture();
        push(&mut history, &mut target, 1);
        push(&mut history, &mut target, 2);
        assert_eq!(history.undo_count(), 0);
        history.release("stroke");
        assert_eq!(history.undo_count(), 1);
        history.undo(&mut target).unwrap();
        assert!(target.is_empty());
        history.redo(&mut target).unwrap();
        assert_eq!(target, vec![1, 2]);
    }

    #[test]
    fn empty_release_records_nothing() {
        let mut history: HistoryManager<Vec<i32>, String> = HistoryManager::default();
        history.capture();
        history.release("nothing");
        assert!(!history.can_undo());
        assert!(!history.is_capturing());
    }

    #[test]
    fn group_rolls_back_on_failure() {
        let mut group: CommandGroup<Vec<i32>, String> = CommandGroup::new("mixed");
        group.add(Box::new(PushValue(1)));
        group.add(Box::new(PushValue(2)));
        group.add(Box::new(PushValue(-3)));
        let mut target = vec![0];
        assert!(group.apply(&mut target).is_err());
        assert_eq!(target, vec![0]);
    }

    #[test]
    fn pop_discards_latest_entry() {
        let mut history = HistoryManager::default();
        let mut target = Vec::new();
        push(&mut history, &mut target, 1);
        push(&mut history, &mut target, 2);
        let popped = history.pop(&mut target).unwrap();
        assert_eq!(popped.map(|c| c.description()).as_deref(), Some("push 2"));
        assert_eq!(target, vec![1]);
        assert!(!history.can_redo());
        assert_eq!(history.undo_count(), 1);
    }

    #[test]
    fn step_limit_drops_oldest() {
        let mut history = HistoryManager::new(2);
        let mut target = Vec::new();
        for v in 1..=4 {
            push(&mut history, &mut target, v);
        }
        assert_eq!(history.undo_history(), vec!["push 4", "push 3"]);
        assert_eq!(history.undo_to(5, &mut target).unwrap(), 2);
        assert_eq!(target, vec![1, 2]);
    }
}
