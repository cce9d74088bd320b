use state_machines::state_machine;

state_machine! {
    name: VisualMachine,
    state: VisualState,
    initial: ContentPending,
    states: [ContentPending, ContentDone, ImagePending, ImageDone, PersistPending, Succeeded, Failed],
    events {
        compose { transition: { from: ContentPending, to: ContentDone } }
        request_image { transition: { from: ContentDone, to: ImagePending } }
        render { transition: { from: ImagePending, to: ImageDone } }
        store { transition: { from: ImageDone, to: PersistPending } }
        commit { transition: { from: PersistPending, to: Succeeded } }
        abort {
            transition: { from: ContentPending, to: Failed }
            transition: { from: ContentDone, to: Failed }
            transition: { from: ImagePending, to: Failed }
            transition: { from: ImageDone, to: Failed }
            transition: { from: PersistPending, to: Failed }
        }
    }
}

pub fn ready() -> VisualMachine<(), ContentPending> {
    VisualMachine::new(())
}
