use bugreport::{
    bugreport,
    collector::{CompileTimeInformation, EnvironmentVariables, OperatingSystem, SoftwareVersion},
    format::Markdown,
};

pub fn run() {
    bugreport!()
        .info(SoftwareVersion::default())
        .info(OperatingSystem::default())
        .info(EnvironmentVariables::list(&[
            "SHELL",
            "TERM",
            "RUST_LOG",
            "IMGSTORE_PORT",
            "IMGSTORE_PUBLIC_URL",
            "IMGSTORE_UPLOAD_DIR",
            "IMGSTORE_MAX_FILE_SIZE",
            "IMGSTORE_ALLOWED_MIME_TYPES",
            "IMGSTORE_DEFAULT_QUALITY",
        ]))
        .info(CompileTimeInformation::default())
        .print::<Markdown>();
}
