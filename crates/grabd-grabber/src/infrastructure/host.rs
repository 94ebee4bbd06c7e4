//! Filesystem-backed [`HostEnvironment`].

use std::io;
use std::path::PathBuf;

use grabd_ipc::paths::restrict_to_owner;

use crate::application::arbitrator::HostEnvironment;

pub struct FilesystemHost {
    socket_path: PathBuf,
    socket_owner: Option<u32>,
    system_configuration_path: PathBuf,
}

impl FilesystemHost {
    pub fn new(
        socket_path: PathBuf,
        socket_owner: Option<u32>,
        system_configuration_path: PathBuf,
    ) -> Self {
        Self {
            socket_path,
            socket_owner,
            system_configuration_path,
        }
    }
}

impl HostEnvironment for FilesystemHost {
    fn secure_server_socket(&self) -> io::Result<()> {
        restrict_to_owner(&self.socket_path, self.socket_owner)
    }

    fn fallback_configuration(&self) -> Option<PathBuf> {
        self.system_configuration_path
            .is_file()
            .then(|| self.system_configuration_path.clone())
    }
}
