use std::path::{Path, PathBuf};

use migrator_core::{validate_path, AttachmentLinker, FileRef, MessageFormatter};
use pretty_assertions::assert_eq;

fn linker() -> AttachmentLinker {
    AttachmentLinker::new("/tmp/migration/attachments")
}

#[test]
fn files_are_grouped_by_extension() {
    let file = FileRef::new(1, "test.png", "https://forum.example/a/1");
    let linker = linker();
    assert_eq!(
        linker.local_path(&file),
        PathBuf::from("/tmp/migration/attachments/png/attachment_1_test.png")
    );
    assert_eq!(linker.relative_link(&file), "./png/attachment_1_test.png");

    let bare = FileRef::new(2, "Makefile", "https://forum.example/a/2");
    assert_eq!(linker.relative_link(&bare), "./unknown/attachment_2_Makefile");
}

#[test]
fn spaces_are_percent_encoded_in_links_only() {
    let file = FileRef::new(4, "my file.txt", "https://forum.example/a/4");
    let linker = linker();
    assert_eq!(linker.relative_link(&file), "./txt/attachment_4_my%20file.txt");
    assert!(linker
        .local_path(&file)
        .ends_with(Path::new("txt/attachment_4_my file.txt")));
}

#[test]
fn hostile_filenames_stay_inside_the_root() {
    let file = FileRef::new(9, "../../../etc/evil.sh", "https://forum.example/a/9");
    let linker = linker();
    let local = linker.local_path(&file);
    assert_eq!(local.file_name().unwrap(), "attachment_9_evil.sh");
    assert!(validate_path(&local, linker.sandbox_root()).is_ok());
}

#[test]
fn every_token_form_is_rewritten() {
    let files = vec![
        FileRef::new(1, "test.png", "https://forum.example/a/1"),
        FileRef::new(2, "doc.pdf", "https://forum.example/a/2"),
        FileRef::new(3, "pic.JPG", "https://forum.example/a/3"),
    ];
    let text = "a [ATTACH=1] b [ATTACH]1[/ATTACH]\n[ATTACH=full]2[/ATTACH]\n[ATTACH type=\"full\" alt=\"x\"]3[/ATTACH]";
    let outcome = linker().rewrite_references(text, &files);

    assert_eq!(
        outcome.text,
        "a ![test.png](./png/attachment_1_test.png) b ![test.png](./png/attachment_1_test.png)\n\
         [doc.pdf](./pdf/attachment_2_doc.pdf)\n\
         ![pic.JPG](./jpg/attachment_3_pic.JPG)"
    );
    assert!(outcome.unresolved.is_empty());
}

#[test]
fn unknown_ids_are_kept_and_reported() {
    let files = vec![FileRef::new(1, "test.png", "https://forum.example/a/1")];
    let outcome = linker().rewrite_references("x [ATTACH=9] y [ATTACH]8[/ATTACH]", &files);
    assert_eq!(outcome.text, "x [ATTACH=9] y [ATTACH]8[/ATTACH]");
    assert_eq!(outcome.unresolved, vec!["[ATTACH=9]", "[ATTACH]8[/ATTACH]"]);
}

#[test]
fn repeated_reference_is_rewritten_each_time() {
    let files = vec![FileRef::new(1, "test.png", "https://forum.example/a/1")];
    let outcome = linker().rewrite_references("[ATTACH=1] and again [ATTACH=1]", &files);
    assert_eq!(
        outcome.text,
        "![test.png](./png/attachment_1_test.png) and again ![test.png](./png/attachment_1_test.png)"
    );
    assert!(outcome.unresolved.is_empty());
}

#[test]
fn tokens_inside_fenced_code_are_left_alone() {
    let files = vec![FileRef::new(1, "test.png", "https://forum.example/a/1")];
    let text = "```\nprint('[ATTACH=1]')\n```\n[ATTACH=1]\n> ```\n> [ATTACH=7]\n> ```";
    let outcome = linker().rewrite_references(text, &files);
    assert_eq!(
        outcome.text,
        "```\nprint('[ATTACH=1]')\n```\n![test.png](./png/attachment_1_test.png)\n> ```\n> [ATTACH=7]\n> ```"
    );
    assert!(outcome.unresolved.is_empty());
}

#[test]
fn brackets_in_names_are_escaped_in_alt_text() {
    let files = vec![FileRef::new(5, "shot [1].png", "https://forum.example/a/5")];
    let outcome = linker().rewrite_references("[ATTACH=5]", &files);
    assert_eq!(
        outcome.text,
        "![shot \\[1\\].png](./png/attachment_5_shot%20[1].png)"
    );
}

#[test]
fn converted_posts_keep_tokens_for_the_linker() {
    let formatter = MessageFormatter::default();
    let files = vec![FileRef::new(1, "test.png", "https://forum.example/a/1")];
    let content = formatter.render_content("[b]Look[/b] @sam [ATTACH=1]");
    let outcome = linker().rewrite_references(&content, &files);
    assert_eq!(
        outcome.text,
        "**Look** **sam** ![test.png](./png/attachment_1_test.png)"
    );
}
