//! # Constants
//!
//! Resource names, label keys, annotation keys and defaults shared across the operator.

/// API group of the Open Liberty custom resources
pub const API_GROUP: &str = "apps.openliberty.io";

/// Field manager used for server-side apply and status patches
pub const FIELD_MANAGER: &str = "open-liberty-operator";

/// Value of `app.kubernetes.io/managed-by` on every object the operator creates
pub const MANAGED_BY: &str = "open-liberty-operator";

pub const LABEL_NAME: &str = "app.kubernetes.io/name";
pub const LABEL_INSTANCE: &str = "app.kubernetes.io/instance";
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const LABEL_PART_OF: &str = "app.kubernetes.io/part-of";

/// Label carrying `<version>.<leafIndex>` on shared resources
pub const LABEL_RESOURCE_PATH_INDEX: &str =
    "openlibertyapplications.apps.openliberty.io/resource-path-index";

/// Label carrying the decision-tree version a leader tracker was written against
pub const LABEL_LEADER_VERSION: &str = "openlibertyapplications.apps.openliberty.io/leader-version";

/// Annotation carrying the SHA-256 of the LTPA generator script
pub const ANNOTATION_SCRIPT_HASH: &str = "openlibertyapplications.apps.openliberty.io/script-hash";

/// Pod-template annotations rolled when shared keys rotate
pub const ANNOTATION_LTPA_KEYS_LAST_ROTATION: &str =
    "openlibertyapplications.apps.openliberty.io/ltpa-keys-last-rotation";
pub const ANNOTATION_LTPA_CONFIG_LAST_ROTATION: &str =
    "openlibertyapplications.apps.openliberty.io/ltpa-config-last-rotation";
pub const ANNOTATION_ENCRYPTION_LAST_ROTATION: &str =
    "openlibertyapplications.apps.openliberty.io/encryption-last-rotation";

/// Finalizers
pub const APPLICATION_FINALIZER: &str = "finalizer.openlibertyapplications.apps.openliberty.io";
pub const TRACE_FINALIZER: &str = "finalizer.openlibertytraces.apps.openliberty.io";

/// Leader tracker Secret name prefix, completed with the family name
pub const LEADER_TRACKER_PREFIX: &str = "olo-managed-leader-tracking-";

/// Leader tracker Secret data keys
pub const TRACKER_KEY_NAMES: &str = "names";
pub const TRACKER_KEY_OWNERS: &str = "owners";
pub const TRACKER_KEY_PATHS: &str = "paths";
pub const TRACKER_KEY_PATH_INDICES: &str = "pathIndices";
pub const TRACKER_KEY_SUBLEASES: &str = "subleases";

/// Age after which a sublease is eligible for eviction
pub const DEFAULT_SUBLEASE_THRESHOLD_SECS: i64 = 20;

// LTPA artifact names (completed with the shared-resource suffix)
pub const LTPA_KEYS_SECRET_PREFIX: &str = "olo-managed-ltpa";
pub const LTPA_SERVER_XML_SECRET_PREFIX: &str = "olo-managed-ltpa-server-xml";
pub const LTPA_MOUNT_XML_SECRET_PREFIX: &str = "olo-managed-ltpa-server-xml-mount";
pub const LTPA_JOB_REQUEST_PREFIX: &str = "olo-managed-ltpa-job-request";
pub const LTPA_SCRIPT_PREFIX: &str = "olo-managed-ltpa-script";
pub const LTPA_KEYS_GENERATION_PREFIX: &str = "olo-managed-ltpa-keys-generation";

/// LTPA keys Secret data keys
pub const LTPA_KEYS_FILE: &str = "ltpa.keys";
pub const LTPA_PASSWORD: &str = "password";
pub const LAST_ROTATION: &str = "lastRotation";
pub const ENCRYPTION_SECRET_LAST_ROTATION: &str = "encryptionSecretLastRotation";
pub const LAST_KEY_RELATED_ROTATION: &str = "lastKeyRelatedRotation";

/// Script ConfigMap key
pub const LTPA_SCRIPT_FILE: &str = "create_ltpa_keys.sh";

/// XML file names inside the server-xml and mount Secrets
pub const LTPA_SERVER_XML_FILE: &str = "ltpaKeysMount.xml";
pub const LTPA_MOUNT_XML_FILE: &str = "ltpaKeysMountInclude.xml";
pub const ENCRYPTION_SERVER_XML_FILE: &str = "encryptionKeyMount.xml";
pub const ENCRYPTION_MOUNT_XML_FILE: &str = "encryptionKeyMountInclude.xml";

/// In-container locations of the shared XML fragments
pub const LTPA_KEYS_MOUNT_PATH: &str = "/config/managedLTPA";
pub const LTPA_SERVER_XML_MOUNT_PATH: &str = "/output/liberty-operator/ltpa";
pub const ENCRYPTION_SERVER_XML_MOUNT_PATH: &str = "/output/liberty-operator/encryption";
pub const OVERRIDES_DIR: &str = "/config/configDropins/overrides";

// Password encryption Secrets
pub const AES_ENCRYPTION_SECRET: &str = "wlp-aes-encryption-key";
pub const LEGACY_ENCRYPTION_SECRET: &str = "wlp-password-encryption-key";
pub const AES_ENCRYPTION_KEY: &str = "aesEncryptionKey";
pub const LEGACY_ENCRYPTION_KEY: &str = "passwordEncryptionKey";

/// Trace dropin
pub const TRACE_DROPIN_PATH: &str = "/config/configDropins/overrides/add_trace.xml";
pub const TRACE_LOG_ROOT: &str = "/serviceability";
pub const APP_CONTAINER: &str = "app";

/// Application defaults
pub const DEFAULT_SERVICE_PORT: i32 = 9080;
pub const DEFAULT_SERVICE_TYPE: &str = "ClusterIP";

/// Worker cache default capacity
pub const DEFAULT_WORKER_CACHE_MAX_WORKERS: usize = 15;

/// Environment variables read from the application container spec
pub const ENV_LTPA_KEY_RESOURCE_SUFFIXES: &str = "LTPA_KEY_RESOURCE_SUFFIXES";
pub const ENV_LTPA_CONFIG_RESOURCE_SUFFIXES: &str = "LTPA_CONFIG_RESOURCE_SUFFIXES";
pub const ENV_LTPA_RESOURCE_SUFFIXES: &str = "LTPA_RESOURCE_SUFFIXES";

/// Default image-pull state location
pub const DEFAULT_IMAGE_PULL_STATE_PATH: &str = "/tmp/open-liberty-operator/image-pull-state.json";

/// Default metrics server bind address
pub const DEFAULT_METRICS_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default health probe bind address
pub const DEFAULT_HEALTH_PROBE_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default server startup timeout in seconds
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default server readiness poll interval in milliseconds
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Default requeue used when the backoff state cannot be read
pub const DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS: u64 = 60;

/// Requeue interval after a successful application reconcile
pub const DEFAULT_RESYNC_SECS: u64 = 300;

/// Manager-level Lease
pub const MANAGER_LEASE_NAME: &str = "open-liberty-operator-lock";

/// Concurrency defaults
pub const DEFAULT_APPLICATION_MAX_CONCURRENT_RECONCILES: u16 = 4;
pub const DEFAULT_TRACE_MAX_CONCURRENT_RECONCILES: u16 = 1;

/// Delay before a failed watch is retried
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Watch backoff bounds while the API server storage reinitialises (milliseconds)
pub const DEFAULT_WATCH_INITIAL_BACKOFF_MS: u64 = 500;
pub const DEFAULT_WATCH_MAX_BACKOFF_MS: u64 = 30_000;

/// Server-side watch timeout, below the client read timeout
pub const WATCH_TIMEOUT_SECS: u32 = 25;
