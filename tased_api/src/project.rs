use std::{
    fs,
    io::{self, Write},
    path::Path,
    sync::Arc,
};

use tased_log::{
    read_tag, read_u32, write_tag, write_u32, InputLog, InputSource, LogError, MarkerSet, Section,
    Tag,
};
use tased_timeline::{
    BranchGraph, ExecutionEngine, Greenzone, History, Snapshot, TimelineConfig, TimelineObserver,
};

use crate::{EditorSession, Error, ProjectSections};

/// The first eight bytes of every project file.
pub const PROJECT_MAGIC: [u8; 8] = *b"TASEDPRJ";

/// The project format version written by this crate.
pub const PROJECT_VERSION: u32 = 1;

/// Section tag for the movie input.
pub const INPUT_TAG: Tag = *b"INPUTLOG";

/// Section tag for markers.
pub const MARKERS_TAG: Tag = *b"MARKERS\0";

const SECTION_COUNT: u32 = 4;

const fn header_len(section_count: u32) -> usize {
    16 + 4 * section_count as usize
}

/// How to treat a project written by a newer version of the format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionSkew {
    /// Load every section that can be read, resetting the ones that cannot.
    #[default]
    BestEffort,
    /// Load only the input and markers.
    MovieOnly,
}

/// The contents of a project file.
///
/// Optional sections that were absent, skipped or unreadable are `None`.
#[derive(Debug, Clone)]
pub struct Project {
    /// The format version the file was written with.
    pub version: u32,
    /// The movie.
    pub input: InputLog,
    /// Markers and notes.
    pub markers: Option<MarkerSet>,
    /// Branch slots.
    pub branches: Option<BranchGraph>,
    /// The lag log and saved checkpoints.
    pub greenzone: Option<Greenzone>,
    /// The playback frame at the time of saving.
    pub playback_frame: u32,
    /// Undo history.
    pub history: Option<History>,
}

fn load_section<T>(
    data: &[u8],
    offset: u32,
    name: &str,
    load: impl FnOnce(&mut &[u8]) -> Result<Option<T>, LogError>,
) -> Option<T> {
    if offset == 0 {
        return None;
    }
    let mut reader = match data.get(offset as usize..) {
        Some(reader) => reader,
        None => {
            tracing::error!("{} section lies outside the file", name);
            return None;
        }
    };
    match load(&mut reader) {
        Ok(section) => section,
        Err(error) => {
            tracing::error!("error loading {}, resetting it: {}", name, error);
            None
        }
    }
}

/// Read a project file.
///
/// The input section must be readable. Any other section that fails to load is logged and
/// reported as `None`.
pub fn read_project(
    filename: &str,
    config: &TimelineConfig,
    skew: VersionSkew,
) -> Result<Project, Error> {
    let data = fs::read(filename).map_err(|error| Error::ProjectReadError {
        filename: filename.to_string(),
        error: Arc::new(error),
    })?;
    let invalid = || Error::InvalidProject {
        filename: filename.to_string(),
    };
    if data.len() < header_len(0) || data[..8] != PROJECT_MAGIC {
        return Err(invalid());
    }

    let mut header = &data[8..];
    let version = read_u32(&mut header)?;
    let section_count = read_u32(&mut header)?;
    if version == 0 {
        return Err(Error::UnsupportedVersion {
            filename: filename.to_string(),
            version,
        });
    }
    if data.len() < header_len(section_count) {
        return Err(invalid());
    }
    let mut offsets = [0u32; SECTION_COUNT as usize];
    for index in 0..section_count as usize {
        let offset = read_u32(&mut header)?;
        if let Some(slot) = offsets.get_mut(index) {
            *slot = offset;
        }
    }

    let mut reader = &data[header_len(section_count)..];
    if read_tag(&mut reader, INPUT_TAG)? != Section::Present {
        return Err(invalid());
    }
    let input = InputLog::load(&mut reader)?;

    let newer = version > PROJECT_VERSION;
    if newer {
        tracing::warn!(
            "{} was written with project version {}, loading with {:?}",
            filename,
            version,
            skew
        );
    }
    let load_all = !(newer && skew == VersionSkew::MovieOnly);
    let [markers_offset, branches_offset, greenzone_offset, history_offset] = offsets;

    let markers = load_section(&data, markers_offset, "markers", |reader| {
        match read_tag(reader, MARKERS_TAG)? {
            Section::Present => Ok(Some(MarkerSet::load(reader)?)),
            Section::Skipped => Ok(None),
        }
    });
    let mut project = Project {
        version,
        input,
        markers,
        branches: None,
        greenzone: None,
        playback_frame: 0,
        history: None,
    };
    if !load_all {
        return Ok(project);
    }

    project.branches = load_section(&data, branches_offset, "branches", |reader| {
        BranchGraph::load(reader).map(Some)
    });
    if let Some((greenzone, playback_frame)) =
        load_section(&data, greenzone_offset, "greenzone", |reader| {
            Greenzone::load(reader).map(Some)
        })
    {
        project.greenzone = Some(greenzone);
        project.playback_frame = playback_frame;
    }
    project.history = load_section(&data, history_offset, "history", |reader| {
        History::load(reader, config)
    });
    if let Some(history) = &project.history {
        if history
            .current()
            .input()
            .find_first_difference(&project.input, ..)
            .is_some()
        {
            tracing::error!("history does not match the movie, resetting it");
            project.history = None;
        }
    }
    Ok(project)
}

fn write_atomically(filename: &str, data: &[u8]) -> io::Result<()> {
    let path = Path::new(filename);
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(data)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|error| error.error)?;
    Ok(())
}

impl<S: InputSource, E: ExecutionEngine, O: TimelineObserver> EditorSession<S, E, O> {
    fn encode_project(&self, sections: &ProjectSections) -> Result<Vec<u8>, LogError> {
        let header_len = header_len(SECTION_COUNT);
        let mut body = Vec::new();
        write_tag(&mut body, INPUT_TAG, true)?;
        InputLog::capture(&self.input, false).save(&mut body)?;

        let mut offsets = [0u32; SECTION_COUNT as usize];
        if sections.markers {
            offsets[0] = (header_len + body.len()) as u32;
            write_tag(&mut body, MARKERS_TAG, true)?;
            self.markers.save(&mut body)?;
        }
        if sections.branches {
            offsets[1] = (header_len + body.len()) as u32;
            self.branches.save(&mut body, true)?;
        }
        if sections.greenzone {
            offsets[2] = (header_len + body.len()) as u32;
            self.greenzone.save(
                &mut body,
                self.config.greenzone_save_mode,
                &self.markers,
                self.playback_frame,
            )?;
        }
        if sections.history {
            offsets[3] = (header_len + body.len()) as u32;
            self.history.save(&mut body, true)?;
        }

        let mut data = Vec::with_capacity(header_len + body.len());
        data.extend_from_slice(&PROJECT_MAGIC);
        write_u32(&mut data, PROJECT_VERSION)?;
        write_u32(&mut data, SECTION_COUNT)?;
        for offset in offsets {
            write_u32(&mut data, offset)?;
        }
        data.extend_from_slice(&body);
        Ok(data)
    }

    /// Write the session to a project file.
    ///
    /// The file is replaced atomically, so a failed save leaves any previous file intact.
    pub fn save_project(&self, filename: &str, sections: &ProjectSections) -> Result<(), Error> {
        let data = self.encode_project(sections)?;
        write_atomically(filename, &data).map_err(|error| Error::ProjectWriteError {
            filename: filename.to_string(),
            error: Arc::new(error),
        })?;
        tracing::info!("saved {} ({} bytes)", filename, data.len());
        Ok(())
    }

    /// Replace the session's contents with a project file.
    ///
    /// If the file cannot be read, the session is left unchanged.
    pub fn load_project(&mut self, filename: &str, skew: VersionSkew) -> Result<(), Error> {
        let project = read_project(filename, &self.config, skew)?;
        self.install(project)?;
        tracing::info!(
            "loaded {}: {} frames, {} history entries",
            filename,
            self.input.frame_count(),
            self.history.len()
        );
        Ok(())
    }

    fn install(&mut self, project: Project) -> Result<(), Error> {
        project.input.write_to(&mut self.input, 0);
        self.markers = project.markers.unwrap_or_else(MarkerSet::new);
        let len = self.input.frame_count();
        self.markers.resize(len);

        let mut greenzone = project.greenzone.unwrap_or_default();
        if !greenzone.has_checkpoint(0) {
            greenzone.write_checkpoint(0, self.power_on.clone());
        }
        self.greenzone = greenzone;
        self.history = match project.history {
            Some(history) => history,
            None => History::new(
                &self.config,
                Snapshot::capture(
                    &self.input,
                    self.greenzone.lag(),
                    &self.markers,
                    self.config.enable_hot_changes,
                ),
            ),
        };
        self.branches = project.branches.unwrap_or_default();
        self.observer.invalidated(0);

        let target = project
            .playback_frame
            .min(self.greenzone.size().saturating_sub(1));
        self.replay_to(target)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.tsp");
        fs::write(&path, b"not a project").unwrap();
        let filename = path.to_str().unwrap();
        assert!(matches!(
            read_project(filename, &TimelineConfig::default(), VersionSkew::BestEffort),
            Err(Error::InvalidProject { .. })
        ));

        let missing = dir.path().join("missing.tsp");
        assert!(matches!(
            read_project(
                missing.to_str().unwrap(),
                &TimelineConfig::default(),
                VersionSkew::BestEffort
            ),
            Err(Error::ProjectReadError { .. })
        ));
    }
}
