//! Container environment
//!
//! Everything the host needs to run the builder in a disposable container:
//! - [`ContainerRuntime`]: narrow engine interface
//! - [`PodmanRuntime`] / [`MockRuntime`]: production and test engines
//! - [`RuntimeDaemon`]: background `podman system service`
//! - [`BuildContext`]: image build context
//! - [`Orchestrator`]: volume and container lifecycle

mod context;
mod daemon;
mod mock;
mod orchestrator;
mod podman;
mod runtime;

pub use context::{digest_dir, BuildContext, ContextError, BUILDER_BINARY};
pub use daemon::{wait_for_socket, RuntimeDaemon, SOCKET_TIMEOUT};
pub use mock::{MockRuntime, RuntimeCall};
pub use orchestrator::Orchestrator;
pub use podman::PodmanRuntime;
pub use runtime::{
    BindMount, ContainerRuntime, ContainerSpec, ContainerState, RuntimeError, VolumeMount,
};

/// Build image tag
pub const IMAGE_TAG: &str = "localstack-build-image";

/// Well-known container name
pub const CONTAINER_NAME: &str = "localstack-build";

/// Runtime service socket
pub const SOCKET_PATH: &str = "/tmp/localstack.sock";

/// Named volumes and their mount points
pub const VOLUMES: [(&str, &str); 4] = [
    ("localstack-build", "/build"),
    ("localstack-keys", "/keys"),
    ("localstack-scripts", "/scripts"),
    ("localstack-release", "/staging"),
];

/// Where the host release directory is bind-mounted
pub const RELEASE_MOUNT: &str = "/release";

/// Build config location inside the image
pub const CONFIG_PATH: &str = "/etc/localstack/build-config.json";

/// Build wrapper location inside the image
pub const BUILD_SCRIPT_PATH: &str = "/usr/local/bin/localstack-build.sh";

/// Main process of the build container
pub const KEEP_ALIVE_COMMAND: [&str; 2] = ["sleep", "infinity"];
