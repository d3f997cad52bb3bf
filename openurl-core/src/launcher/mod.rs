mod dispatcher;
mod platform;
mod resolvers;

pub use dispatcher::{BrowserLauncher, OpenMode};
pub use platform::{
    ConfigStore, Environment, LaunchAttempt, ProcessEnumerator, ProcessSpawner, SpawnOptions,
    StdEnvironment, StoreError, SystemConfigStore, SystemProcessEnumerator, SystemProcessSpawner,
};
pub use resolvers::{Resolvers, SystemDefaultLookup};
